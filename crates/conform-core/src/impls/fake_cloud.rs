//! FakeCloudNetwork - 開発・テスト用のクラウドネットワークサービス
//!
//! リージョンごとにホスト一覧とサーバーを保持します。
//! サーバーの IP はホスト名と連番から決定的に割り当てます。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::ConformError;
use crate::ports::{CloudNetworkApi, CloudServer};

use super::script::{CallScript, locked};

const SYSTEM: &str = "cloud-network";

#[derive(Debug, Default)]
struct CloudState {
    next_id: u64,
    hosts: BTreeMap<String, BTreeSet<String>>,
    /// region -> server id -> server
    servers: BTreeMap<String, BTreeMap<String, CloudServer>>,
}

#[derive(Debug, Default)]
pub struct FakeCloudNetwork {
    state: Mutex<CloudState>,
    script: CallScript,
}

impl FakeCloudNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> &CallScript {
        &self.script
    }

    pub fn add_host(&self, region: &str, host: &str) {
        locked(&self.state)
            .hosts
            .entry(region.to_string())
            .or_default()
            .insert(host.to_string());
    }

    pub fn seed_server(&self, region: &str, tag: &str, name: &str, host: &str) -> CloudServer {
        let mut state = locked(&self.state);
        Self::spawn(&mut state, region, tag, name, host)
    }

    /// Drop a server behind the controller's back.
    pub fn vanish(&self, region: &str, server_id: &str) {
        if let Some(servers) = locked(&self.state).servers.get_mut(region) {
            servers.remove(server_id);
        }
    }

    pub fn servers(&self, region: &str) -> Vec<CloudServer> {
        locked(&self.state)
            .servers
            .get(region)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    fn spawn(state: &mut CloudState, region: &str, tag: &str, name: &str, host: &str) -> CloudServer {
        state.next_id += 1;
        let server = CloudServer {
            id: format!("srv-{}", state.next_id),
            name: name.to_string(),
            host: host.to_string(),
            tag: tag.to_string(),
            ip_address: Some(format!("10.0.{}.{}", state.next_id / 250, state.next_id % 250 + 1)),
        };
        state
            .servers
            .entry(region.to_string())
            .or_default()
            .insert(server.id.clone(), server.clone());
        server
    }
}

#[async_trait]
impl CloudNetworkApi for FakeCloudNetwork {
    async fn list_hosts(&self, region: &str) -> Result<Vec<String>, ConformError> {
        self.script.enter(SYSTEM, "list_hosts", region)?;
        Ok(locked(&self.state)
            .hosts
            .get(region)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_servers(&self, region: &str, tag: &str) -> Result<Vec<CloudServer>, ConformError> {
        self.script.enter(SYSTEM, "list_servers", tag)?;
        Ok(locked(&self.state)
            .servers
            .get(region)
            .map(|s| s.values().filter(|srv| srv.tag == tag).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_server(
        &self,
        region: &str,
        tag: &str,
        name: &str,
        host: &str,
    ) -> Result<CloudServer, ConformError> {
        self.script.enter(SYSTEM, "create_server", name)?;
        let mut state = locked(&self.state);
        let known = state
            .hosts
            .get(region)
            .is_some_and(|hosts| hosts.contains(host));
        if !known {
            return Err(ConformError::external(
                SYSTEM,
                format!("host {host} is not available in {region}"),
            ));
        }
        Ok(Self::spawn(&mut state, region, tag, name, host))
    }

    async fn delete_server(&self, region: &str, server_id: &str) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "delete_server", server_id)?;
        locked(&self.state)
            .servers
            .get_mut(region)
            .and_then(|s| s.remove(server_id))
            .map(|_| ())
            .ok_or_else(|| ConformError::external(SYSTEM, format!("server {server_id} not found")))
    }
}
