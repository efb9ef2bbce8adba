//! Target identifier parsing
//!
//! Two shapes are accepted:
//! - `scheme://service?group_name=<g>&clusters=<c1,c2>`, or `scheme:///service`
//!   (an authority may precede the path, gRPC style, and is ignored)
//! - a bare `service` name, with the group supplied by the builder

use crate::{ResolveError, Result};
use url::Url;

pub const GROUP_PARAM: &str = "group_name";
pub const CLUSTERS_PARAM: &str = "clusters";

/// Parsed resolution target: a service name plus optional selectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    scheme: Option<String>,
    service: String,
    group: Option<String>,
    clusters: Vec<String>,
}

impl Target {
    /// Target for a bare service name.
    pub fn service(service: impl Into<String>) -> Result<Self> {
        let service = service.into();
        validate_service(&service)?;
        Ok(Self {
            scheme: None,
            service,
            group: None,
            clusters: Vec::new(),
        })
    }

    /// Parse a user supplied resolution string.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResolveError::InvalidArgument("empty target".to_string()));
        }

        if !raw.contains("://") {
            return Self::service(raw);
        }

        let url = Url::parse(raw)
            .map_err(|e| ResolveError::InvalidArgument(format!("target {}: {}", raw, e)))?;

        let path = url.path().trim_matches('/');
        let service = if path.is_empty() {
            url.host_str().unwrap_or_default()
        } else {
            path
        };
        validate_service(service)?;

        let mut group = None;
        let mut clusters: Vec<String> = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                GROUP_PARAM if !value.trim().is_empty() => group = Some(value.trim().to_string()),
                CLUSTERS_PARAM => {
                    for cluster in value.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                        if !clusters.iter().any(|c| c == cluster) {
                            clusters.push(cluster.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            scheme: Some(url.scheme().to_string()),
            service: service.to_string(),
            group,
            clusters,
        })
    }

    /// Fill in the group when the target string did not carry one.
    pub fn with_default_group(mut self, group: &str) -> Self {
        if self.group.is_none() && !group.trim().is_empty() {
            self.group = Some(group.trim().to_string());
        }
        self
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Empty means every cluster.
    pub fn clusters(&self) -> &[String] {
        &self.clusters
    }
}

fn validate_service(service: &str) -> Result<()> {
    if service.is_empty() {
        return Err(ResolveError::InvalidArgument("empty service name".to_string()));
    }
    if service
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'))
    {
        return Err(ResolveError::InvalidArgument(format!(
            "invalid service name: {}",
            service
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_form() {
        let target = Target::parse("nacos://orders?group_name=payments&clusters=sh").unwrap();
        assert_eq!(target.scheme(), Some("nacos"));
        assert_eq!(target.service_name(), "orders");
        assert_eq!(target.group(), Some("payments"));
        assert_eq!(target.clusters(), &["sh".to_string()]);
    }

    #[test]
    fn test_parse_path_form() {
        let target = Target::parse("nacos:///orders").unwrap();
        assert_eq!(target.service_name(), "orders");
        assert_eq!(target.group(), None);
        assert!(target.clusters().is_empty());

        let target = Target::parse("nacos://registry.local/orders/").unwrap();
        assert_eq!(target.service_name(), "orders");
    }

    #[test]
    fn test_parse_bare_service() {
        let target = Target::parse("orders").unwrap().with_default_group("payments");
        assert_eq!(target.scheme(), None);
        assert_eq!(target.service_name(), "orders");
        assert_eq!(target.group(), Some("payments"));
    }

    #[test]
    fn test_query_group_beats_default() {
        let target = Target::parse("nacos://orders?group_name=payments")
            .unwrap()
            .with_default_group("other");
        assert_eq!(target.group(), Some("payments"));
    }

    #[test]
    fn test_clusters_split_and_dedup() {
        let target = Target::parse("nacos://orders?clusters=a,b,,a&clusters=c&mode=x").unwrap();
        assert_eq!(target.clusters(), &["a", "b", "c"]);
    }

    #[test]
    fn test_invalid_targets() {
        for raw in ["", "   ", "nacos://", "nacos:///", "my service", "nacos://orders:port"] {
            let err = Target::parse(raw).unwrap_err();
            assert!(
                matches!(err, ResolveError::InvalidArgument(_)),
                "{:?} should be rejected",
                raw
            );
        }
    }
}
