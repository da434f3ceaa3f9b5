// # Entity Resolver
//
// Resolves event entity paths to virtual machines and looks up the
// account the process is logged in as.

use async_trait::async_trait;
use bond_core::cache::METADATA_REL;
use bond_core::traits::EntityResolver;
use bond_core::{Error, Result, VirtualMachine};
use serde_json::Value;

use crate::connection::ApiConnection;
use crate::dto::{ResourceDto, VirtualMachineDto};

const LOGIN_PATH: &str = "login";
const EDIT_REL: &str = "edit";

/// `EntityResolver` over the REST API
///
/// Entity identifiers in events are API paths; resolving one is a GET on
/// that path. The VM's metadata document is fetched alongside when the VM
/// links to one.
#[derive(Debug, Clone)]
pub struct HttpEntityResolver {
    conn: ApiConnection,
}

impl HttpEntityResolver {
    pub fn new(conn: ApiConnection) -> Self {
        Self { conn }
    }

    async fn fetch_metadata(&self, vm: &VirtualMachineDto) -> Value {
        let Some(href) = crate::dto::find_link(&vm.links, METADATA_REL) else {
            return Value::Null;
        };
        match self.conn.get_json::<Value>(&self.conn.url(href)).await {
            Ok(document) => document,
            Err(e) => {
                tracing::debug!("No metadata for vm {}: {}", vm.name, e);
                Value::Null
            }
        }
    }
}

#[async_trait]
impl EntityResolver for HttpEntityResolver {
    async fn resolve_vm(&self, entity_id: &str) -> Result<Option<VirtualMachine>> {
        let url = self.conn.url(entity_id);
        let response = self.conn.get(&url).await?;

        match response.status {
            404 => {
                tracing::debug!("Entity {} no longer exists", entity_id);
                Ok(None)
            }
            s if (200..300).contains(&s) => {
                let dto: VirtualMachineDto = serde_json::from_str(&response.body).map_err(|e| {
                    Error::normalize(format!("Entity {} is not a virtual machine: {}", entity_id, e))
                })?;
                let metadata = self.fetch_metadata(&dto).await;
                Ok(Some(dto.into_vm(metadata)))
            }
            status => Err(Error::http_status(
                format!("Failed to resolve entity {}", entity_id),
                url,
                status,
            )),
        }
    }

    async fn current_user_link(&self) -> Result<String> {
        let user: ResourceDto = self.conn.get_json(&self.conn.url(LOGIN_PATH)).await?;
        user.link(EDIT_REL)
            .map(str::to_string)
            .ok_or_else(|| Error::not_found(format!("No '{}' link for user {}", EDIT_REL, user.name)))
    }
}
