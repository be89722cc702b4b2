//! Route table for carrier-bound dispatch.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How a route's endpoint is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// Endpoint is a carrier tag; dispatch goes to that handler.
    Carrier,
    /// Endpoint is delivered through the SMPP sink.
    Smpp,
}

/// One routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination prefix; empty matches everything.
    pub prefix: String,
    pub kind: RouteKind,
    pub endpoint: String,
}

/// Ordered route rules. Matching preserves configuration order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        for route in &routes {
            debug!(
                prefix = %route.prefix,
                kind = ?route.kind,
                endpoint = %route.endpoint,
                "route registered"
            );
        }
        Self { routes }
    }

    /// Resolve a route for a message.
    ///
    /// A carrier-typed route whose endpoint equals the resolved carrier tag
    /// wins; otherwise the first route whose prefix matches the destination.
    pub fn resolve(&self, carrier: Option<&str>, destination: &str) -> Option<&Route> {
        if let Some(tag) = carrier {
            if let Some(route) = self
                .routes
                .iter()
                .find(|r| r.kind == RouteKind::Carrier && r.endpoint == tag)
            {
                return Some(route);
            }
        }

        self.routes
            .iter()
            .find(|r| destination.starts_with(r.prefix.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(vec![
            Route {
                prefix: "+1555".into(),
                kind: RouteKind::Smpp,
                endpoint: "peer-a".into(),
            },
            Route {
                prefix: "".into(),
                kind: RouteKind::Carrier,
                endpoint: "twilio".into(),
            },
        ])
    }

    #[test]
    fn carrier_tag_beats_prefix() {
        let table = table();
        // The prefix route would match first in scan order, but the resolved
        // carrier tag overrides it.
        let route = table.resolve(Some("twilio"), "+15550001").unwrap();
        assert_eq!(route.kind, RouteKind::Carrier);
        assert_eq!(route.endpoint, "twilio");
    }

    #[test]
    fn prefix_fallback_in_scan_order() {
        let table = table();
        let route = table.resolve(None, "+15550001").unwrap();
        assert_eq!(route.endpoint, "peer-a");
    }

    #[test]
    fn empty_prefix_is_catch_all() {
        let table = table();
        let route = table.resolve(None, "+4479000000").unwrap();
        assert_eq!(route.endpoint, "twilio");
    }

    #[test]
    fn unresolvable_tag_falls_back_to_prefix() {
        let table = table();
        let route = table.resolve(Some("nexmo"), "+15550001").unwrap();
        assert_eq!(route.endpoint, "peer-a");
    }

    #[test]
    fn no_match_is_none() {
        let table = RouteTable::new(vec![Route {
            prefix: "+258".into(),
            kind: RouteKind::Carrier,
            endpoint: "twilio".into(),
        }]);
        assert!(table.resolve(None, "+15550001").is_none());
    }
}
