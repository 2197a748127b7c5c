//! FakeApplianceManager - 開発・テスト用の appliance manager
//!
//! デバイスコンテナ、メンバー、セキュリティグループをメモリ上に保持します。
//! `script()` で呼び出し履歴の確認と失敗の注入ができます。

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::ConformError;
use crate::ports::{ApplianceManagerApi, DeviceMember, ManagerDevice, ManagerSecurityGroup};

use super::script::{CallScript, locked};

const SYSTEM: &str = "appliance-manager";

#[derive(Debug, Default)]
struct ManagerState {
    next_id: u64,
    devices: BTreeMap<String, ManagerDevice>,
    members: BTreeMap<String, BTreeMap<String, DeviceMember>>,
    groups: BTreeMap<String, BTreeMap<String, ManagerSecurityGroup>>,
}

impl ManagerState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn device_exists(&self, device_id: &str) -> Result<(), ConformError> {
        if self.devices.contains_key(device_id) {
            Ok(())
        } else {
            Err(ConformError::external(SYSTEM, format!("device {device_id} not found")))
        }
    }
}

#[derive(Debug)]
pub struct FakeApplianceManager {
    device_groups: bool,
    security_groups: bool,
    state: Mutex<ManagerState>,
    script: CallScript,
}

impl FakeApplianceManager {
    /// A manager that supports both device groups and security-group sync.
    pub fn new() -> Self {
        Self::with_features(true, true)
    }

    pub fn with_features(device_groups: bool, security_groups: bool) -> Self {
        Self {
            device_groups,
            security_groups,
            state: Mutex::new(ManagerState::default()),
            script: CallScript::default(),
        }
    }

    pub fn script(&self) -> &CallScript {
        &self.script
    }

    pub fn seed_device(&self, name: &str) -> String {
        let mut state = locked(&self.state);
        let id = state.allocate("dev");
        state.devices.insert(
            id.clone(),
            ManagerDevice {
                id: id.clone(),
                name: name.to_string(),
            },
        );
        id
    }

    pub fn seed_member(&self, device_id: &str, name: &str, ip_address: Option<&str>) -> String {
        let mut state = locked(&self.state);
        let id = state.allocate("mem");
        state.members.entry(device_id.to_string()).or_default().insert(
            id.clone(),
            DeviceMember {
                id: id.clone(),
                name: name.to_string(),
                ip_address: ip_address.map(str::to_string),
            },
        );
        id
    }

    pub fn seed_security_group(&self, device_id: &str, name: &str, member_ips: &[&str]) -> String {
        let mut state = locked(&self.state);
        let id = state.allocate("sg");
        state.groups.entry(device_id.to_string()).or_default().insert(
            id.clone(),
            ManagerSecurityGroup {
                id: id.clone(),
                name: name.to_string(),
                member_ips: member_ips.iter().map(|s| s.to_string()).collect(),
            },
        );
        id
    }

    pub fn devices(&self) -> Vec<ManagerDevice> {
        locked(&self.state).devices.values().cloned().collect()
    }

    pub fn members(&self, device_id: &str) -> Vec<DeviceMember> {
        locked(&self.state)
            .members
            .get(device_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn security_groups(&self, device_id: &str) -> Vec<ManagerSecurityGroup> {
        locked(&self.state)
            .groups
            .get(device_id)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for FakeApplianceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApplianceManagerApi for FakeApplianceManager {
    fn supports_device_groups(&self) -> bool {
        self.device_groups
    }

    fn syncs_security_groups(&self) -> bool {
        self.security_groups
    }

    async fn find_device(&self, device_id: &str) -> Result<Option<ManagerDevice>, ConformError> {
        self.script.enter(SYSTEM, "find_device", device_id)?;
        Ok(locked(&self.state).devices.get(device_id).cloned())
    }

    async fn create_device(&self, name: &str) -> Result<String, ConformError> {
        self.script.enter(SYSTEM, "create_device", name)?;
        let mut state = locked(&self.state);
        let id = state.allocate("dev");
        state.devices.insert(
            id.clone(),
            ManagerDevice {
                id: id.clone(),
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    async fn update_device(&self, device: &ManagerDevice) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "update_device", &device.id)?;
        let mut state = locked(&self.state);
        state.device_exists(&device.id)?;
        state.devices.insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn delete_device(&self, device_id: &str) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "delete_device", device_id)?;
        let mut state = locked(&self.state);
        state.device_exists(device_id)?;
        state.devices.remove(device_id);
        state.members.remove(device_id);
        state.groups.remove(device_id);
        Ok(())
    }

    async fn list_members(&self, device_id: &str) -> Result<Vec<DeviceMember>, ConformError> {
        self.script.enter(SYSTEM, "list_members", device_id)?;
        let state = locked(&self.state);
        state.device_exists(device_id)?;
        Ok(state
            .members
            .get(device_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_member(
        &self,
        device_id: &str,
        name: &str,
        ip_address: Option<&str>,
    ) -> Result<String, ConformError> {
        self.script.enter(SYSTEM, "create_member", name)?;
        let mut state = locked(&self.state);
        state.device_exists(device_id)?;
        let id = state.allocate("mem");
        state.members.entry(device_id.to_string()).or_default().insert(
            id.clone(),
            DeviceMember {
                id: id.clone(),
                name: name.to_string(),
                ip_address: ip_address.map(str::to_string),
            },
        );
        Ok(id)
    }

    async fn update_member(&self, device_id: &str, member: &DeviceMember) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "update_member", &member.name)?;
        let mut state = locked(&self.state);
        let slot = state
            .members
            .get_mut(device_id)
            .and_then(|m| m.get_mut(&member.id))
            .ok_or_else(|| ConformError::external(SYSTEM, format!("member {} not found", member.id)))?;
        *slot = member.clone();
        Ok(())
    }

    async fn delete_member(&self, device_id: &str, member_id: &str) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "delete_member", member_id)?;
        let mut state = locked(&self.state);
        state
            .members
            .get_mut(device_id)
            .and_then(|m| m.remove(member_id))
            .map(|_| ())
            .ok_or_else(|| ConformError::external(SYSTEM, format!("member {member_id} not found")))
    }

    async fn list_security_groups(
        &self,
        device_id: &str,
    ) -> Result<Vec<ManagerSecurityGroup>, ConformError> {
        self.script.enter(SYSTEM, "list_security_groups", device_id)?;
        let state = locked(&self.state);
        state.device_exists(device_id)?;
        Ok(state
            .groups
            .get(device_id)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_security_group(
        &self,
        device_id: &str,
        name: &str,
        member_ips: &[String],
    ) -> Result<String, ConformError> {
        self.script.enter(SYSTEM, "create_security_group", name)?;
        let mut state = locked(&self.state);
        state.device_exists(device_id)?;
        let id = state.allocate("sg");
        state.groups.entry(device_id.to_string()).or_default().insert(
            id.clone(),
            ManagerSecurityGroup {
                id: id.clone(),
                name: name.to_string(),
                member_ips: member_ips.to_vec(),
            },
        );
        Ok(id)
    }

    async fn update_security_group(
        &self,
        device_id: &str,
        group: &ManagerSecurityGroup,
    ) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "update_security_group", &group.name)?;
        let mut state = locked(&self.state);
        let slot = state
            .groups
            .get_mut(device_id)
            .and_then(|g| g.get_mut(&group.id))
            .ok_or_else(|| ConformError::external(SYSTEM, format!("group {} not found", group.id)))?;
        *slot = group.clone();
        Ok(())
    }

    async fn delete_security_group(&self, device_id: &str, group_id: &str) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "delete_security_group", group_id)?;
        let mut state = locked(&self.state);
        state
            .groups
            .get_mut(device_id)
            .and_then(|g| g.remove(group_id))
            .map(|_| ())
            .ok_or_else(|| ConformError::external(SYSTEM, format!("group {group_id} not found")))
    }
}
