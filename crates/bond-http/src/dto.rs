//! Wire shapes of the management server REST API

use std::collections::BTreeMap;

use bond_core::VirtualMachine;
use serde::Deserialize;
use serde_json::Value;

/// A hypermedia link
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Link {
    /// Relation
    pub rel: String,
    /// Target
    pub href: String,
}

/// Href of the first link with relation `rel`
pub fn find_link<'a>(links: &'a [Link], rel: &str) -> Option<&'a str> {
    links
        .iter()
        .find(|link| link.rel == rel)
        .map(|link| link.href.as_str())
}

/// One page of a collection resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection<T> {
    /// Elements on this page
    #[serde(default = "Vec::new")]
    pub collection: Vec<T>,
    /// Page links (`next`, `first`, ...)
    #[serde(default)]
    pub links: Vec<Link>,
    /// Total number of elements across all pages
    #[serde(default)]
    pub total_size: Option<u64>,
}

impl<T> Collection<T> {
    /// Href of the next page
    pub fn next(&self) -> Option<&str> {
        find_link(&self.links, "next")
    }
}

/// Any named resource with links (datacenter, rack, machine, user)
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDto {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl ResourceDto {
    pub fn link(&self, rel: &str) -> Option<&str> {
        find_link(&self.links, rel)
    }
}

/// A virtual machine as returned by the API
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualMachineDto {
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl VirtualMachineDto {
    /// Convert into the event model, attaching `metadata`
    pub fn into_vm(self, metadata: Value) -> VirtualMachine {
        let links: BTreeMap<String, String> = self
            .links
            .into_iter()
            .map(|link| (link.rel, link.href))
            .collect();
        VirtualMachine {
            name: self.name,
            state: self.state,
            links,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bond_core::traits::RawEvent;

    #[test]
    fn test_collection_next_link() {
        let page: Collection<ResourceDto> = serde_json::from_str(
            r#"{
                "collection": [{"name": "dc1", "links": [{"rel": "racks", "href": "/admin/datacenters/1/racks"}]}],
                "links": [{"rel": "first", "href": "/a?page=0"}, {"rel": "next", "href": "/a?page=1"}],
                "totalSize": 7
            }"#,
        )
        .unwrap();

        assert_eq!(page.next(), Some("/a?page=1"));
        assert_eq!(page.total_size, Some(7));
        assert_eq!(page.collection[0].link("racks"), Some("/admin/datacenters/1/racks"));
    }

    #[test]
    fn test_empty_collection() {
        let page: Collection<ResourceDto> = serde_json::from_str("{}").unwrap();
        assert!(page.collection.is_empty());
        assert_eq!(page.next(), None);
    }

    #[test]
    fn test_vm_conversion_keeps_links() {
        let dto: VirtualMachineDto = serde_json::from_str(
            r#"{"name": "web-1", "state": "ON", "links": [{"rel": "metadata", "href": "http://m/vms/1/metadata"}]}"#,
        )
        .unwrap();

        let vm = dto.into_vm(Value::Null);
        assert_eq!(vm.name, "web-1");
        assert!(vm.is_allocated());
        assert_eq!(vm.link("metadata"), Some("http://m/vms/1/metadata"));
    }

    #[test]
    fn test_event_log_page_parses_raw_events() {
        let page: Collection<RawEvent> = serde_json::from_str(
            r#"{"collection": [{"type": "VIRTUAL_MACHINE", "action": "DEPLOY_FINISH", "timestamp": 1700000000000, "user": "alice", "entityIdentifier": "/cloud/vms/1"}]}"#,
        )
        .unwrap();

        assert_eq!(page.collection[0].action, "DEPLOY_FINISH");
        assert_eq!(
            page.collection[0].entity_identifier.as_deref(),
            Some("/cloud/vms/1")
        );
    }
}
