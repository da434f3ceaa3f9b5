// # Event Translator
//
// Default `Normalizer`. Classifies raw records into event kinds, resolving
// the referenced VM through an `EntityResolver` and keeping the resource
// cache in step with deploys and undeploys.
//
// ## Classification
//
// | type              | action              | kind            |
// |-------------------|---------------------|-----------------|
// | VIRTUAL_MACHINE   | METADATA_MODIFIED   | Backup (*)      |
// | VIRTUAL_MACHINE   | DEPLOY_FINISH       | Deploy          |
// | VIRTUAL_MACHINE   | UNDEPLOY_FINISH     | Undeploy        |
// | VIRTUAL_MACHINE   | RESTORE_BACKUP      | Restore         |
// | VIRTUAL_MACHINE   | anything else       | VirtualMachine  |
// | anything else     |                     | Generic         |
//
// (*) Dropped when the VM is gone or not allocated, and when the change
// was made by this process's own account: writing backup results back
// produces METADATA_MODIFIED events of its own.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{METADATA_REL, ResourceCache};
use crate::event::{Event, EventKind, VirtualMachine};
use crate::traits::normalizer::{EntityResolver, Normalizer, RawEvent};

const VIRTUAL_MACHINE_TYPE: &str = "VIRTUAL_MACHINE";

/// Classifies raw events and enriches VM events
pub struct EventTranslator {
    resolver: Arc<dyn EntityResolver>,
    cache: Arc<ResourceCache>,
    service_account_link: String,
}

impl EventTranslator {
    /// Create a translator
    ///
    /// `service_account_link` is the edit link of the account this process
    /// writes back with.
    pub fn new(
        resolver: Arc<dyn EntityResolver>,
        cache: Arc<ResourceCache>,
        service_account_link: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            cache,
            service_account_link: service_account_link.into(),
        }
    }

    /// Whether `user` is the account this process writes back with
    pub fn is_service_account(&self, user: &str) -> bool {
        !user.is_empty()
            && self
                .service_account_link
                .to_lowercase()
                .ends_with(&user.to_lowercase())
    }

    async fn resolve(&self, raw: &RawEvent) -> Result<Option<VirtualMachine>, crate::Error> {
        match raw.entity_identifier.as_deref() {
            Some(id) => self.resolver.resolve_vm(id).await,
            None => Ok(None),
        }
    }

    async fn translate_vm_event(&self, raw: RawEvent) -> Result<Option<Event>, crate::Error> {
        let vm = self.resolve(&raw).await?;

        match raw.action.as_str() {
            "METADATA_MODIFIED" => {
                let Some(vm) = vm.filter(VirtualMachine::is_allocated) else {
                    debug!(action = %raw.action, "VM missing or not allocated, ignoring backup change");
                    return Ok(None);
                };
                if self.is_service_account(&raw.user) {
                    debug!("Event was generated by the dedicated user, ignoring");
                    return Ok(None);
                }
                self.cache.refresh_link(&vm, METADATA_REL);
                Event::from_raw(EventKind::Backup, &raw, Some(vm)).map(Some)
            }
            "DEPLOY_FINISH" => {
                if let Some(vm) = &vm {
                    self.cache.insert_vm(vm);
                }
                Event::from_raw(EventKind::Deploy, &raw, vm).map(Some)
            }
            "UNDEPLOY_FINISH" => {
                let event = Event::from_raw(EventKind::Undeploy, &raw, vm)?;
                if let Some(name) = event.vm_name() {
                    self.cache.remove(name);
                }
                Ok(Some(event))
            }
            "RESTORE_BACKUP" => {
                if let Some(vm) = &vm {
                    self.cache.refresh_link(vm, METADATA_REL);
                }
                Event::from_raw(EventKind::Restore, &raw, vm).map(Some)
            }
            _ => Event::from_raw(EventKind::VirtualMachine, &raw, vm).map(Some),
        }
    }
}

#[async_trait]
impl Normalizer for EventTranslator {
    async fn normalize(&self, raw: RawEvent) -> Result<Option<Event>, crate::Error> {
        if raw.event_type.eq_ignore_ascii_case(VIRTUAL_MACHINE_TYPE) {
            self.translate_vm_event(raw).await
        } else {
            Event::from_raw(EventKind::Generic, &raw, None).map(Some)
        }
    }
}
