// # Cache Preload
//
// Startup walk of the server's infrastructure tree that seeds the
// resource cache.

use bond_core::{ResourceCache, Result};

use crate::connection::ApiConnection;
use crate::dto::{ResourceDto, VirtualMachineDto};

const DATACENTERS_PATH: &str = "admin/datacenters";

/// Seed `cache` with every VM the server knows about
///
/// Walks datacenters → racks → machines → virtual machines, following
/// pagination at every level. A resource missing its child link is logged
/// and skipped. Returns the number of VMs cached.
pub async fn preload_cache(conn: &ApiConnection, cache: &ResourceCache) -> Result<usize> {
    let mut count = 0;

    let datacenters: Vec<ResourceDto> = conn.get_all(&conn.url(DATACENTERS_PATH)).await?;
    for dc in &datacenters {
        for rack in children(conn, dc, "racks").await? {
            for machine in children(conn, &rack, "machines").await? {
                let Some(href) = machine.link("virtualmachines") else {
                    tracing::warn!("Machine {} has no 'virtualmachines' link", machine.name);
                    continue;
                };
                let vms: Vec<VirtualMachineDto> = conn.get_all(&conn.url(href)).await?;
                for vm in vms {
                    cache.insert_vm(&vm.into_vm(serde_json::Value::Null));
                    count += 1;
                }
            }
        }
    }

    tracing::info!(
        "Cached links of {} vm(s) across {} datacenter(s)",
        count,
        datacenters.len()
    );
    Ok(count)
}

async fn children(conn: &ApiConnection, parent: &ResourceDto, rel: &str) -> Result<Vec<ResourceDto>> {
    match parent.link(rel) {
        Some(href) => conn.get_all(&conn.url(href)).await,
        None => {
            tracing::warn!("Resource {} has no '{}' link", parent.name, rel);
            Ok(Vec::new())
        }
    }
}
