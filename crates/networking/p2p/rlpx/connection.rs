use super::{
    error::RLPxError,
    frame,
    handshake::decode_ack_message,
    message::{Message, RLPxMessage as _},
    p2p::{Capability, HelloMessage},
    utils::{ecdh_xchng, id2pubkey},
};
use crate::rlpx::handshake::encode_auth_message;
use aes::cipher::KeyIvInit;
use etherlight_core::{H256, H512};
use etherlight_rlp::decode::RLPDecode;
use k256::{ecdsa::SigningKey, PublicKey, SecretKey};
use sha3::{Digest, Keccak256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub(crate) const CAP_P2P: (Capability, u8) = (Capability::P2p, 5);
pub(crate) const CAP_LES: (Capability, u8) = (Capability::Les, 2);
pub(crate) const SUPPORTED_CAPABILITIES: [(Capability, u8); 2] = [CAP_P2P, CAP_LES];

const MAX_HANDSHAKE_PACKET_SIZE: usize = 2048;

pub(crate) type Aes256Ctr64BE = ctr::Ctr64BE<aes::Aes256>;

/// An encrypted, authenticated session with one remote peer. The client only
/// ever dials out, so the state machine runs the initiator side:
/// Initiator -> InitiatedAuth -> Established.
pub(crate) struct RLPxConnection<S> {
    signer: SigningKey,
    state: RLPxConnectionState,
    stream: S,
}

impl<S: AsyncWrite + AsyncRead + std::marker::Unpin> RLPxConnection<S> {
    fn new(signer: SigningKey, stream: S, state: RLPxConnectionState) -> Self {
        Self {
            signer,
            state,
            stream,
        }
    }

    /// Prepares an outbound connection towards the given peer id.
    pub fn initiator(signer: SigningKey, remote_node_id: H512, stream: S) -> Self {
        let mut rng = rand::thread_rng();
        let state = RLPxConnectionState::Initiator(Initiator::new(
            H256::random_using(&mut rng),
            SecretKey::random(&mut rng),
            remote_node_id,
        ));
        Self::new(signer, stream, state)
    }

    /// Runs the RLPx handshake and the Hello exchange. After this returns the
    /// connection is ACTIVE and ready for subprotocol messages.
    pub async fn handshake(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(_) => {
                self.send_auth().await?;
                self.receive_ack().await?;
            }
            _ => {
                return Err(RLPxError::HandshakeError(
                    "Invalid connection state for handshake".to_string(),
                ))
            }
        };
        debug!("Completed RLPx handshake");

        self.exchange_hello_messages().await?;
        Ok(())
    }

    async fn exchange_hello_messages(&mut self) -> Result<(), RLPxError> {
        let hello_msg = Message::Hello(HelloMessage::new(
            SUPPORTED_CAPABILITIES.to_vec(),
            PublicKey::from(self.signer.verifying_key()),
        ));

        self.send(hello_msg).await?;

        // Receive Hello message
        match self.receive().await? {
            Message::Hello(hello_message) => {
                // The peer must serve les/2 for the session to be of any use
                if hello_message.capabilities.contains(&CAP_LES) {
                    Ok(())
                } else {
                    Err(RLPxError::HandshakeError(
                        "Peer does not support les/2".to_string(),
                    ))
                }
            }
            Message::Disconnect(disconnect) => Err(RLPxError::HandshakeError(format!(
                "Peer disconnected during hello exchange (reason: {:?})",
                disconnect.reason
            ))),
            _ => Err(RLPxError::HandshakeError(
                "Expected Hello message".to_string(),
            )),
        }
    }

    async fn send_auth(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(initiator_state) => {
                let secret_key: SecretKey = self.signer.clone().into();
                let peer_pk =
                    id2pubkey(initiator_state.remote_node_id).ok_or(RLPxError::InvalidPeerId())?;

                // Cloning previous state to avoid ownership issues
                let previous_state = initiator_state.clone();

                let msg = encode_auth_message(
                    &secret_key,
                    previous_state.nonce,
                    &peer_pk,
                    &previous_state.ephemeral_key,
                )?;

                self.stream
                    .write_all(&msg)
                    .await
                    .map_err(|_| RLPxError::ConnectionError("Could not send message".to_string()))?;

                self.state =
                    RLPxConnectionState::InitiatedAuth(InitiatedAuth::new(previous_state, msg));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }

    async fn receive_ack(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::InitiatedAuth(initiated_auth_state) => {
                let secret_key: SecretKey = self.signer.clone().into();
                // Cloning previous state to avoid ownership issues
                let previous_state = initiated_auth_state.clone();
                let msg_bytes = self.receive_handshake_msg().await?;
                let size_data = &msg_bytes
                    .get(..2)
                    .ok_or(RLPxError::InvalidMessageLength())?;
                let msg = &msg_bytes
                    .get(2..)
                    .ok_or(RLPxError::InvalidMessageLength())?;
                let ack = decode_ack_message(&secret_key, msg, size_data)?;
                let remote_ephemeral_key = ack
                    .get_ephemeral_pubkey()
                    .ok_or(RLPxError::NotFound("Remote ephemeral key".to_string()))?;
                // Build next state
                self.state =
                    RLPxConnectionState::Established(Box::new(Established::for_initiator(
                        previous_state,
                        msg_bytes.to_owned(),
                        ack.nonce,
                        remote_ephemeral_key,
                    )));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }

    async fn receive_handshake_msg(&mut self) -> Result<Vec<u8>, RLPxError> {
        let mut buf = vec![0; MAX_HANDSHAKE_PACKET_SIZE];

        // Read the message's size
        self.stream
            .read_exact(&mut buf[..2])
            .await
            .map_err(|_| RLPxError::ConnectionError("Connection dropped".to_string()))?;
        let ack_data = [buf[0], buf[1]];
        let msg_size = u16::from_be_bytes(ack_data) as usize;
        if msg_size + 2 > MAX_HANDSHAKE_PACKET_SIZE {
            return Err(RLPxError::InvalidMessageLength());
        }

        // Read the rest of the message
        self.stream
            .read_exact(&mut buf[2..msg_size + 2])
            .await
            .map_err(|_| RLPxError::ConnectionError("Connection dropped".to_string()))?;
        let ack_bytes = &buf[..msg_size + 2];
        Ok(ack_bytes.to_vec())
    }

    pub async fn send(&mut self, message: Message) -> Result<(), RLPxError> {
        match &mut self.state {
            RLPxConnectionState::Established(state) => {
                let mut frame_buffer = vec![];
                message.encode(&mut frame_buffer)?;
                frame::write(frame_buffer, state, &mut self.stream).await?;
                Ok(())
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }

    pub async fn receive(&mut self) -> Result<Message, RLPxError> {
        match &mut self.state {
            RLPxConnectionState::Established(state) => {
                let frame_data = frame::read(state, &mut self.stream).await?;
                let (msg_id, msg_data): (u8, _) = RLPDecode::decode_unfinished(&frame_data)?;
                Ok(Message::decode(msg_id, msg_data)?)
            }
            _ => Err(RLPxError::InvalidState()),
        }
    }
}

enum RLPxConnectionState {
    Initiator(Initiator),
    InitiatedAuth(InitiatedAuth),
    Established(Box<Established>),
}

#[derive(Clone)]
struct Initiator {
    pub(crate) nonce: H256,
    pub(crate) ephemeral_key: SecretKey,
    pub(crate) remote_node_id: H512,
}

impl Initiator {
    pub fn new(nonce: H256, ephemeral_key: SecretKey, remote_node_id: H512) -> Self {
        Self {
            nonce,
            ephemeral_key,
            remote_node_id,
        }
    }
}

#[derive(Clone)]
struct InitiatedAuth {
    pub(crate) remote_node_id: H512,
    pub(crate) local_nonce: H256,
    pub(crate) local_ephemeral_key: SecretKey,
    pub(crate) local_init_message: Vec<u8>,
}

impl InitiatedAuth {
    pub fn new(previous_state: Initiator, local_init_message: Vec<u8>) -> Self {
        Self {
            remote_node_id: previous_state.remote_node_id,
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            local_init_message,
        }
    }
}

pub(crate) struct Established {
    pub remote_node_id: H512,
    pub(crate) mac_key: H256,
    pub ingress_mac: Keccak256,
    pub egress_mac: Keccak256,
    pub ingress_aes: Aes256Ctr64BE,
    pub egress_aes: Aes256Ctr64BE,
}

impl Established {
    fn for_initiator(
        previous_state: InitiatedAuth,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        // keccak256(nonce || initiator-nonce), local node is the initiator
        let hashed_nonces =
            Keccak256::digest([remote_nonce.0, previous_state.local_nonce.0].concat()).into();

        Self::new(
            previous_state.remote_node_id,
            previous_state.local_init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            remote_init_message,
            remote_nonce,
            remote_ephemeral_key,
        )
    }

    #[cfg(test)]
    pub(crate) fn for_receiver(
        remote_node_id: H512,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
        local_init_message: Vec<u8>,
        local_nonce: H256,
        local_ephemeral_key: SecretKey,
    ) -> Self {
        // keccak256(nonce || initiator-nonce), remote node is the initiator
        let hashed_nonces = Keccak256::digest([local_nonce.0, remote_nonce.0].concat()).into();

        Self::new(
            remote_node_id,
            local_init_message,
            local_nonce,
            local_ephemeral_key,
            hashed_nonces,
            remote_init_message,
            remote_nonce,
            remote_ephemeral_key,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        remote_node_id: H512,
        local_init_message: Vec<u8>,
        local_nonce: H256,
        local_ephemeral_key: SecretKey,
        hashed_nonces: [u8; 32],
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        let ephemeral_key_secret = ecdh_xchng(&local_ephemeral_key, &remote_ephemeral_key);

        // shared-secret = keccak256(ephemeral-key || keccak256(nonce || initiator-nonce))
        let shared_secret =
            Keccak256::digest([ephemeral_key_secret, hashed_nonces].concat()).into();
        // aes-secret = keccak256(ephemeral-key || shared-secret)
        let aes_key =
            H256(Keccak256::digest([ephemeral_key_secret, shared_secret].concat()).into());
        // mac-secret = keccak256(ephemeral-key || aes-secret)
        let mac_key = H256(Keccak256::digest([ephemeral_key_secret, aes_key.0].concat()).into());

        // egress-mac = keccak256.init((mac-secret ^ remote-nonce) || auth)
        let egress_mac = Keccak256::default()
            .chain_update(mac_key ^ remote_nonce)
            .chain_update(&local_init_message);

        // ingress-mac = keccak256.init((mac-secret ^ initiator-nonce) || ack)
        let ingress_mac = Keccak256::default()
            .chain_update(mac_key ^ local_nonce)
            .chain_update(&remote_init_message);

        let ingress_aes = <Aes256Ctr64BE as KeyIvInit>::new(&aes_key.0.into(), &[0; 16].into());
        let egress_aes = ingress_aes.clone();
        Self {
            remote_node_id,
            mac_key,
            ingress_mac,
            egress_mac,
            ingress_aes,
            egress_aes,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ResponderConnection;
    use super::*;
    use crate::rlpx::p2p::PingMessage;
    use crate::rlpx::utils::pubkey2id;
    use rand::rngs::OsRng;
    use tokio::io::duplex;

    fn keypair() -> (SigningKey, H512) {
        let signer = SigningKey::random(&mut OsRng);
        let node_id = pubkey2id(&PublicKey::from(signer.verifying_key()));
        (signer, node_id)
    }

    #[tokio::test]
    async fn handshake_derives_matching_secrets() {
        let (client_signer, _) = keypair();
        let (server_signer, server_id) = keypair();

        let (client_stream, server_stream) = duplex(16 * 1024);

        let server = tokio::spawn(async move {
            ResponderConnection::accept(server_signer, server_stream)
                .await
                .unwrap()
        });

        let mut client = RLPxConnection::initiator(client_signer, server_id, client_stream);
        client.send_auth().await.unwrap();
        client.receive_ack().await.unwrap();
        let server = server.await.unwrap();

        let client_state = match &client.state {
            RLPxConnectionState::Established(state) => state,
            _ => panic!("client not established"),
        };
        // Both roles must derive the same aes and mac secrets.
        assert_eq!(client_state.mac_key, server.state.mac_key);
    }

    #[tokio::test]
    async fn frames_roundtrip_after_handshake() {
        let (client_signer, _) = keypair();
        let (server_signer, server_id) = keypair();

        let (client_stream, server_stream) = duplex(16 * 1024);

        let server = tokio::spawn(async move {
            let mut server = ResponderConnection::accept(server_signer, server_stream)
                .await
                .unwrap();
            // Echo one message back
            let msg = server.receive().await.unwrap();
            assert!(matches!(msg, Message::Ping(_)));
            server.send(Message::Pong(crate::rlpx::p2p::PongMessage::new())).await.unwrap();
        });

        let mut client = RLPxConnection::initiator(client_signer, server_id, client_stream);
        client.send_auth().await.unwrap();
        client.receive_ack().await.unwrap();

        client
            .send(Message::Ping(PingMessage::new()))
            .await
            .unwrap();
        let reply = client.receive().await.unwrap();
        assert!(matches!(reply, Message::Pong(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn corrupted_frame_fails_mac_check() {
        let (client_signer, _) = keypair();
        let (server_signer, server_id) = keypair();

        // Interpose on the server->client byte stream to flip one bit.
        let (client_stream, mut middle) = duplex(16 * 1024);
        let (mut relay, server_stream) = duplex(16 * 1024);

        let server = tokio::spawn(async move {
            let mut server = ResponderConnection::accept(server_signer, server_stream)
                .await
                .unwrap();
            server
                .send_raw_frame(b"a frame the client never sees intact".to_vec())
                .await
                .unwrap();
        });

        // Forward the handshake unmodified, then corrupt a byte of the frame.
        let relay_task = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 1024];
            // auth: client -> server
            let n = middle.read(&mut buf).await.unwrap();
            relay.write_all(&buf[..n]).await.unwrap();
            // ack: server -> client
            let n = relay.read(&mut buf).await.unwrap();
            middle.write_all(&buf[..n]).await.unwrap();
            // frame: server -> client, with one corrupted byte in the body
            loop {
                let n = match relay.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if n > 40 {
                    buf[40] ^= 0x01;
                }
                if middle.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });

        let mut client = RLPxConnection::initiator(client_signer, server_id, client_stream);
        client.send_auth().await.unwrap();
        client.receive_ack().await.unwrap();

        let result = client.receive().await;
        assert!(matches!(result, Err(RLPxError::InvalidMac())));

        server.await.unwrap();
        relay_task.abort();
    }
}
