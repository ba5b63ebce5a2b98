//! Registers this client with every configured indexnode and keeps the
//! registration warm: tracks per-peer last-contact state, backing off
//! quietly on failure rather than logging every missed beat at error
//! level.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::{interval, Duration};

use crate::config::ClientConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
    Unreachable,
}

pub struct Communicator {
    client: reqwest::Client,
    alias: String,
    own_port: u16,
    cltoken: u64,
    states: RwLock<HashMap<SocketAddr, RegistrationState>>,
}

impl Communicator {
    pub fn new(alias: String, own_port: u16, cltoken: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            alias,
            own_port,
            cltoken,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn state_of(&self, indexnode: SocketAddr) -> RegistrationState {
        self.states
            .read()
            .get(&indexnode)
            .copied()
            .unwrap_or(RegistrationState::Unregistered)
    }

    /// Sends one `/hello` to `indexnode`, updating its tracked state.
    /// Failures are expected (the indexnode may be transiently down) and
    /// are not escalated beyond the state map.
    pub async fn say_hello(&self, indexnode: SocketAddr) {
        let url = format!("http://{indexnode}/hello");
        let result = self
            .client
            .get(&url)
            .header(fs2_core::protocol::HEADER_VERSION, fs2_core::PROTOCOL_VERSION)
            .header(fs2_core::protocol::HEADER_PORT, self.own_port.to_string())
            .header(fs2_core::protocol::HEADER_CLTOKEN, self.cltoken.to_string())
            .header(fs2_core::protocol::HEADER_ALIAS, self.alias.as_str())
            .send()
            .await;

        let new_state = match result {
            Ok(resp) if resp.status().is_success() => RegistrationState::Registered,
            _ => RegistrationState::Unreachable,
        };
        self.states.write().insert(indexnode, new_state);
    }

    /// Runs the periodic re-hello loop for every indexnode named in
    /// `config.indexnodes`, spacing calls out so one slow indexnode never
    /// delays hellos to the rest.
    pub async fn run(self: Arc<Self>, config: Arc<ClientConfig>) {
        let mut ticker = interval(Duration::from_millis(config.refresh_interval_ms));
        loop {
            ticker.tick().await;
            for &indexnode in &config.indexnodes {
                let this = self.clone();
                tokio::spawn(async move { this.say_hello(indexnode).await });
            }
        }
    }
}
