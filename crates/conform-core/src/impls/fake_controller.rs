//! FakeNetworkController - 開発・テスト用のネットワーク仮想化コントローラ

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::ConformError;
use crate::ports::{ControllerService, NetworkControllerApi, VendorTemplate};

use super::script::{CallScript, locked};

const SYSTEM: &str = "network-controller";

#[derive(Debug, Default)]
struct ControllerState {
    next_id: u64,
    services: BTreeMap<String, ControllerService>,
    templates: BTreeMap<String, BTreeMap<String, VendorTemplate>>,
}

impl ControllerState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn templates_of(&mut self, service_id: &str) -> Result<&mut BTreeMap<String, VendorTemplate>, ConformError> {
        if !self.services.contains_key(service_id) {
            return Err(ConformError::external(
                SYSTEM,
                format!("service {service_id} not found"),
            ));
        }
        Ok(self.templates.entry(service_id.to_string()).or_default())
    }
}

#[derive(Debug, Default)]
pub struct FakeNetworkController {
    state: Mutex<ControllerState>,
    script: CallScript,
}

impl FakeNetworkController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> &CallScript {
        &self.script
    }

    pub fn seed_service(&self, name: &str) -> String {
        let mut state = locked(&self.state);
        let id = state.allocate("svc");
        state.services.insert(
            id.clone(),
            ControllerService {
                id: id.clone(),
                name: name.to_string(),
            },
        );
        id
    }

    pub fn seed_template(&self, service_id: &str, policy_id: u64, name: &str) -> String {
        let mut state = locked(&self.state);
        let id = state.allocate("tpl");
        state.templates.entry(service_id.to_string()).or_default().insert(
            id.clone(),
            VendorTemplate {
                id: id.clone(),
                policy_id,
                name: name.to_string(),
            },
        );
        id
    }

    pub fn services(&self) -> Vec<ControllerService> {
        locked(&self.state).services.values().cloned().collect()
    }

    pub fn templates(&self, service_id: &str) -> Vec<VendorTemplate> {
        locked(&self.state)
            .templates
            .get(service_id)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NetworkControllerApi for FakeNetworkController {
    async fn find_service(&self, service_id: &str) -> Result<Option<ControllerService>, ConformError> {
        self.script.enter(SYSTEM, "find_service", service_id)?;
        Ok(locked(&self.state).services.get(service_id).cloned())
    }

    async fn register_service(&self, name: &str) -> Result<String, ConformError> {
        self.script.enter(SYSTEM, "register_service", name)?;
        let mut state = locked(&self.state);
        let id = state.allocate("svc");
        state.services.insert(
            id.clone(),
            ControllerService {
                id: id.clone(),
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    async fn update_service(&self, service: &ControllerService) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "update_service", &service.id)?;
        let mut state = locked(&self.state);
        let slot = state
            .services
            .get_mut(&service.id)
            .ok_or_else(|| ConformError::external(SYSTEM, format!("service {} not found", service.id)))?;
        *slot = service.clone();
        Ok(())
    }

    async fn unregister_service(&self, service_id: &str) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "unregister_service", service_id)?;
        let mut state = locked(&self.state);
        if state.services.remove(service_id).is_none() {
            return Err(ConformError::external(
                SYSTEM,
                format!("service {service_id} not found"),
            ));
        }
        state.templates.remove(service_id);
        Ok(())
    }

    async fn list_templates(&self, service_id: &str) -> Result<Vec<VendorTemplate>, ConformError> {
        self.script.enter(SYSTEM, "list_templates", service_id)?;
        let mut state = locked(&self.state);
        Ok(state.templates_of(service_id)?.values().cloned().collect())
    }

    async fn register_template(
        &self,
        service_id: &str,
        policy_id: u64,
        name: &str,
    ) -> Result<String, ConformError> {
        self.script.enter(SYSTEM, "register_template", name)?;
        let mut state = locked(&self.state);
        let id = state.allocate("tpl");
        state.templates_of(service_id)?.insert(
            id.clone(),
            VendorTemplate {
                id: id.clone(),
                policy_id,
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    async fn update_template(&self, service_id: &str, template: &VendorTemplate) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "update_template", &template.name)?;
        let mut state = locked(&self.state);
        let slot = state
            .templates_of(service_id)?
            .get_mut(&template.id)
            .ok_or_else(|| ConformError::external(SYSTEM, format!("template {} not found", template.id)))?;
        *slot = template.clone();
        Ok(())
    }

    async fn remove_template(&self, service_id: &str, template_id: &str) -> Result<(), ConformError> {
        self.script.enter(SYSTEM, "remove_template", template_id)?;
        let mut state = locked(&self.state);
        state
            .templates_of(service_id)?
            .remove(template_id)
            .map(|_| ())
            .ok_or_else(|| ConformError::external(SYSTEM, format!("template {template_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistering_a_service_drops_its_templates() {
        let controller = FakeNetworkController::new();
        let service = controller.register_service("vs-1").await.unwrap();
        controller.register_template(&service, 7, "web").await.unwrap();
        assert_eq!(controller.templates(&service).len(), 1);

        controller.unregister_service(&service).await.unwrap();
        assert!(controller.services().is_empty());
        assert!(controller.list_templates(&service).await.is_err());
    }
}
