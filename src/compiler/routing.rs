//! Balancers, routing rules, DNS and policy sections.

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use crate::error::SyncError;
use crate::model::Balancer;

/// Balancers whose selector and fallback resolve against `outbound_tags`.
pub fn compile_balancers(
    balancers: &[&Balancer],
    outbound_tags: &BTreeSet<String>,
    issues: &mut Vec<SyncError>,
) -> Vec<Value> {
    let mut sorted: Vec<&&Balancer> = balancers.iter().collect();
    sorted.sort_by(|a, b| (&a.tag, a.id).cmp(&(&b.tag, b.id)));

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for balancer in sorted {
        let entity = format!("balancer {}", balancer.tag);
        if !seen.insert(balancer.tag.as_str()) {
            issues.push(SyncError::validation(entity, "duplicate tag"));
            continue;
        }

        let mut selector = Vec::new();
        for tag in &balancer.selector {
            if outbound_tags.contains(tag) {
                if !selector.contains(tag) {
                    selector.push(tag.clone());
                }
            } else {
                issues.push(SyncError::incomplete(&entity, tag));
            }
        }
        if selector.is_empty() {
            issues.push(SyncError::validation(entity, "selector resolves to no outbounds"));
            continue;
        }

        let mut compiled = json!({
            "tag": balancer.tag,
            "selector": selector,
            "strategy": { "type": balancer.strategy.as_str() },
        });
        if let Some(fallback) = &balancer.fallback_tag {
            if outbound_tags.contains(fallback) {
                compiled["fallbackTag"] = json!(fallback);
            } else {
                issues.push(SyncError::incomplete(&entity, fallback));
            }
        }
        out.push(compiled);
    }
    out
}

/// Tags a routing rule may point at.
pub struct RuleTargets<'a> {
    pub inbounds: &'a BTreeSet<String>,
    pub outbounds: &'a BTreeSet<String>,
    pub balancers: &'a BTreeSet<String>,
}

/// The routing section: per-user rules first, then the node's free-form
/// rules with dangling references removed, then the compiled balancers.
pub fn compile_routing(
    document: Option<&Value>,
    user_rules: Vec<Value>,
    balancers: Vec<Value>,
    targets: &RuleTargets<'_>,
    issues: &mut Vec<SyncError>,
) -> Value {
    let mut routing = match document {
        None => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            issues.push(SyncError::validation("routing", "expected a JSON object"));
            Map::new()
        }
    };

    let free_rules = match routing.remove("rules") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(rules)) => rules,
        Some(_) => {
            issues.push(SyncError::validation("routing rules", "expected an array"));
            Vec::new()
        }
    };

    let mut rules = user_rules;
    for (index, rule) in free_rules.into_iter().enumerate() {
        if let Some(rule) = filter_rule(index, rule, targets, issues) {
            rules.push(rule);
        }
    }
    routing.insert("rules".into(), Value::Array(rules));

    if balancers.is_empty() {
        routing.remove("balancers");
    } else {
        routing.insert("balancers".into(), Value::Array(balancers));
    }
    Value::Object(routing)
}

/// Drop rules in `routing.rules` that point at tags missing from `body`.
///
/// Node overrides may add rules or replace the sections they reference.
pub fn resolve_rule_targets(body: &mut Value, issues: &mut Vec<SyncError>) {
    let tags = |section: Option<&Value>| -> BTreeSet<String> {
        section
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["tag"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    let inbounds = tags(body.get("inbounds"));
    let outbounds = tags(body.get("outbounds"));
    let balancers = tags(body.get("routing").and_then(|r| r.get("balancers")));

    let Some(Value::Array(rules)) = body.get_mut("routing").and_then(|r| r.get_mut("rules")) else {
        return;
    };
    let targets = RuleTargets {
        inbounds: &inbounds,
        outbounds: &outbounds,
        balancers: &balancers,
    };
    let current = std::mem::take(rules);
    *rules = current
        .into_iter()
        .enumerate()
        .filter_map(|(index, rule)| filter_rule(index, rule, &targets, issues))
        .collect();
}

fn filter_rule(
    index: usize,
    rule: Value,
    targets: &RuleTargets<'_>,
    issues: &mut Vec<SyncError>,
) -> Option<Value> {
    let entity = format!("routing rule #{}", index);
    let Value::Object(mut rule) = rule else {
        issues.push(SyncError::validation(entity, "expected a JSON object"));
        return None;
    };

    for (key, known) in [
        ("outboundTag", targets.outbounds),
        ("balancerTag", targets.balancers),
    ] {
        match rule.get(key) {
            None => {}
            Some(Value::String(tag)) if known.contains(tag) => {}
            Some(Value::String(tag)) => {
                issues.push(SyncError::incomplete(&entity, tag.as_str()));
                return None;
            }
            Some(_) => {
                issues.push(SyncError::validation(&entity, format!("{} must be a string", key)));
                return None;
            }
        }
    }

    if let Some(inbound) = rule.remove("inboundTag") {
        let listed: Vec<String> = match inbound {
            Value::String(tag) => vec![tag],
            Value::Array(tags) => tags
                .into_iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        let mut kept = Vec::new();
        for tag in listed {
            if targets.inbounds.contains(&tag) {
                kept.push(tag);
            } else {
                issues.push(SyncError::incomplete(&entity, tag));
            }
        }
        if kept.is_empty() {
            return None;
        }
        rule.insert("inboundTag".into(), json!(kept));
    }

    Some(Value::Object(rule))
}

/// A DNS document must be an object; `servers`, when present, an array.
pub fn validate_dns(document: &Value) -> Result<Value, SyncError> {
    let Value::Object(map) = document else {
        return Err(SyncError::validation("dns", "expected a JSON object"));
    };
    match map.get("servers") {
        None | Some(Value::Array(_)) => Ok(document.clone()),
        Some(_) => Err(SyncError::validation("dns", "servers must be an array")),
    }
}

/// A policy document must be an object; `levels`, when present, an object.
pub fn validate_policy(document: &Value) -> Result<Value, SyncError> {
    let Value::Object(map) = document else {
        return Err(SyncError::validation("policy", "expected a JSON object"));
    };
    match map.get("levels") {
        None | Some(Value::Object(_)) => Ok(document.clone()),
        Some(_) => Err(SyncError::validation("policy", "levels must be an object")),
    }
}

/// Emitted when a node has no policy: turns on the counters agents report.
pub fn default_policy() -> Value {
    json!({
        "levels": {
            "0": { "statsUserUplink": true, "statsUserDownlink": true }
        },
        "system": {
            "statsInboundUplink": true,
            "statsInboundDownlink": true,
            "statsOutboundUplink": true,
            "statsOutboundDownlink": true
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BalancerStrategy, EntityId, NodeId, TenantId};

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn balancer(tag: &str, selector: &[&str], fallback: Option<&str>) -> Balancer {
        Balancer {
            id: EntityId::new(),
            tenant_id: TenantId::new("t1"),
            node_id: NodeId::new(),
            tag: tag.into(),
            selector: selector.iter().map(|s| s.to_string()).collect(),
            strategy: BalancerStrategy::LeastPing,
            fallback_tag: fallback.map(str::to_string),
        }
    }

    #[test]
    fn test_balancer_drops_unresolved_selector_entries() {
        let outbounds = tags(&["a", "b"]);
        let lb = balancer("lb", &["a", "ghost", "b"], Some("nowhere"));
        let mut issues = Vec::new();
        let out = compile_balancers(&[&lb], &outbounds, &mut issues);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["selector"], json!(["a", "b"]));
        assert_eq!(out[0]["strategy"]["type"], "leastPing");
        assert!(out[0].get("fallbackTag").is_none());
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.code() == "incomplete_config"));
    }

    #[test]
    fn test_balancer_with_empty_selector_is_omitted() {
        let lb = balancer("lb", &["ghost"], None);
        let mut issues = Vec::new();
        let out = compile_balancers(&[&lb], &tags(&["a"]), &mut issues);
        assert!(out.is_empty());
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_routing_filters_dangling_rules() {
        let inbounds = tags(&["in1"]);
        let outbounds = tags(&["direct", "block"]);
        let balancers = tags(&["lb"]);
        let targets = RuleTargets {
            inbounds: &inbounds,
            outbounds: &outbounds,
            balancers: &balancers,
        };
        let doc = json!({
            "domainStrategy": "IPIfNonMatch",
            "rules": [
                { "type": "field", "domain": ["geosite:ads"], "outboundTag": "block" },
                { "type": "field", "ip": ["1.1.1.1"], "outboundTag": "missing" },
                { "type": "field", "network": "tcp", "balancerTag": "lb" },
                { "type": "field", "inboundTag": ["in1", "gone"], "outboundTag": "direct" },
                { "type": "field", "inboundTag": "gone", "outboundTag": "direct" },
                "not-a-rule"
            ]
        });
        let user_rule = json!({ "type": "field", "user": ["a@x"], "outboundTag": "direct" });
        let mut issues = Vec::new();
        let routing = compile_routing(Some(&doc), vec![user_rule.clone()], vec![], &targets, &mut issues);

        let rules = routing["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0], user_rule);
        assert_eq!(rules[3]["inboundTag"], json!(["in1"]));
        assert_eq!(routing["domainStrategy"], "IPIfNonMatch");
        assert!(routing.get("balancers").is_none());
        // missing outbound, "gone" twice, non-object rule
        assert_eq!(issues.len(), 4);
    }

    #[test]
    fn test_dns_and_policy_validation() {
        assert!(validate_dns(&json!({ "servers": ["1.1.1.1"] })).is_ok());
        assert!(validate_dns(&json!({ "servers": "1.1.1.1" })).is_err());
        assert!(validate_dns(&json!([1, 2])).is_err());
        assert!(validate_policy(&json!({ "levels": { "0": {} } })).is_ok());
        assert!(validate_policy(&json!({ "levels": [] })).is_err());
    }
}
