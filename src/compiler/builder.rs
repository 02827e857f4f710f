//! Snapshot → document.
//!
//! # Steps
//! 1. Drop rows outside the node's tenant/node scope.
//! 2. Emit enabled inbounds and outbounds (stream settings via `stream.rs`).
//! 3. Bind eligible clients into their inbounds by tag.
//! 4. Compile balancers and routing against the emitted tag sets.
//! 5. Validate DNS/policy, assemble, apply node overrides, hash.
//! 6. Re-resolve routing rules against the overridden body.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::compiler::clients::{client_entry, list_key};
use crate::compiler::document::{apply_overrides, content_version, CompiledDocument};
use crate::compiler::routing::{
    compile_balancers, compile_routing, default_policy, resolve_rule_targets, validate_dns,
    validate_policy, RuleTargets,
};
use crate::compiler::stream::{resolve_stream_settings, Direction};
use crate::error::SyncError;
use crate::model::{DocumentKind, Inbound, NodeId, NodeSnapshot, Outbound, TenantId};

/// Outbounds every node gets unless a configured outbound claims the tag.
const BUILTIN_OUTBOUNDS: [(&str, &str); 2] = [("direct", "freedom"), ("block", "blackhole")];

struct PendingInbound {
    tag: String,
    protocol: String,
    json: Map<String, Value>,
    clients: Vec<Value>,
    emails: BTreeSet<String>,
}

/// Build the document for `snapshot.node` as of `now`.
///
/// Pure: the same snapshot and clock always yield the same body and version.
pub fn compile(snapshot: &NodeSnapshot, now: u64) -> CompiledDocument {
    let node = &snapshot.node;
    let tenant = &node.tenant_id;
    let mut issues = Vec::new();

    let in_scope = |kind: &str, tag: &str, row_tenant: &TenantId, row_node: NodeId| {
        let ok = row_tenant == tenant && row_node == node.id;
        if !ok {
            tracing::warn!(
                node_id = %node.id,
                tenant_id = %tenant,
                row_tenant = %row_tenant,
                kind,
                tag,
                "Dropping row outside node scope"
            );
        }
        ok
    };

    // --- Inbounds ---
    let mut inbound_rows: Vec<&Inbound> = snapshot
        .inbounds
        .iter()
        .filter(|r| in_scope("inbound", &r.tag, &r.tenant_id, r.node_id))
        .collect();
    inbound_rows.sort_by(|a, b| (a.sort_order, &a.tag, a.id).cmp(&(b.sort_order, &b.tag, b.id)));

    let disabled_inbounds: BTreeSet<&str> = inbound_rows
        .iter()
        .filter(|r| !r.enabled)
        .map(|r| r.tag.as_str())
        .collect();

    let mut inbounds: Vec<PendingInbound> = Vec::new();
    for row in inbound_rows.iter().filter(|r| r.enabled) {
        let entity = format!("inbound {}", row.tag);
        if inbounds.iter().any(|p| p.tag == row.tag) {
            issues.push(SyncError::validation(entity, "duplicate tag"));
            continue;
        }
        let mut json = Map::new();
        json.insert("tag".into(), json!(row.tag));
        json.insert("protocol".into(), json!(row.protocol));
        json.insert("port".into(), json!(row.port));
        if let Some(listen) = row.listen.as_deref().filter(|l| !l.is_empty()) {
            json.insert("listen".into(), json!(listen));
        }
        json.insert(
            "settings".into(),
            row.settings.clone().unwrap_or_else(|| json!({})),
        );
        json.insert(
            "streamSettings".into(),
            resolve_stream_settings(
                &entity,
                Direction::Inbound,
                row.stream_settings.as_ref(),
                &row.transport,
                &row.security,
                &mut issues,
            ),
        );
        json.insert(
            "sniffing".into(),
            json!({
                "enabled": row.sniffing.enabled,
                "destOverride": row.sniffing.dest_override,
                "routeOnly": row.sniffing.route_only,
            }),
        );
        inbounds.push(PendingInbound {
            tag: row.tag.clone(),
            protocol: row.protocol.clone(),
            json,
            clients: Vec::new(),
            emails: BTreeSet::new(),
        });
    }

    // --- Outbounds ---
    let mut outbound_rows: Vec<&Outbound> = snapshot
        .outbounds
        .iter()
        .filter(|r| in_scope("outbound", &r.tag, &r.tenant_id, r.node_id))
        .filter(|r| r.enabled)
        .collect();
    outbound_rows.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.tag.cmp(&b.tag))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut outbounds: Vec<Value> = Vec::new();
    let mut outbound_tags: BTreeSet<String> = BTreeSet::new();
    for row in outbound_rows {
        let entity = format!("outbound {}", row.tag);
        if !outbound_tags.insert(row.tag.clone()) {
            issues.push(SyncError::validation(entity, "duplicate tag"));
            continue;
        }
        let mut json = json!({
            "tag": row.tag,
            "protocol": row.protocol,
            "streamSettings": resolve_stream_settings(
                &entity,
                Direction::Outbound,
                row.stream_settings.as_ref(),
                &row.transport,
                &row.security,
                &mut issues,
            ),
        });
        if let Some(settings) = &row.settings {
            json["settings"] = settings.clone();
        }
        outbounds.push(json);
    }
    for (tag, protocol) in BUILTIN_OUTBOUNDS {
        if outbound_tags.insert(tag.to_string()) {
            outbounds.push(json!({ "tag": tag, "protocol": protocol }));
        }
    }

    // --- Clients ---
    let mut clients: Vec<_> = snapshot
        .clients
        .iter()
        .filter(|c| in_scope("client", &c.email, &c.tenant_id, c.node_id))
        .filter(|c| c.is_eligible(now))
        .collect();
    clients.sort_by(|a, b| (&a.email, a.id).cmp(&(&b.email, b.id)));
    let next_expiry = clients.iter().filter_map(|c| c.expiry).min();

    let mut user_routes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for client in clients {
        let entity = format!("client {}", client.email);
        for tag in &client.inbound_tags {
            match inbounds.iter_mut().find(|p| &p.tag == tag) {
                Some(pending) => {
                    if !pending.emails.insert(client.email.clone()) {
                        issues.push(SyncError::validation(
                            &entity,
                            format!("duplicate email in inbound {}", tag),
                        ));
                        continue;
                    }
                    match client_entry(&pending.protocol, client) {
                        Ok(entry) => pending.clients.push(entry),
                        Err(e) => issues.push(e),
                    }
                }
                None if disabled_inbounds.contains(tag.as_str()) => {
                    tracing::debug!(
                        node_id = %node.id,
                        client = %client.email,
                        inbound = %tag,
                        "Client bound to disabled inbound; excluded"
                    );
                }
                None => issues.push(SyncError::incomplete(&entity, tag)),
            }
        }
        if let Some(outbound) = &client.outbound_tag {
            if outbound_tags.contains(outbound) {
                user_routes
                    .entry(outbound.clone())
                    .or_default()
                    .push(client.email.clone());
            } else {
                issues.push(SyncError::incomplete(&entity, outbound));
            }
        }
    }
    let user_rules: Vec<Value> = user_routes
        .into_iter()
        .map(|(outbound, users)| json!({ "type": "field", "user": users, "outboundTag": outbound }))
        .collect();

    let inbound_tags: BTreeSet<String> = inbounds.iter().map(|p| p.tag.clone()).collect();
    let inbounds: Vec<Value> = inbounds
        .into_iter()
        .map(|mut pending| {
            if let Some(key) = list_key(&pending.protocol) {
                if !pending.json["settings"].is_object() {
                    pending.json.insert("settings".into(), json!({}));
                }
                pending.json["settings"][key] = Value::Array(pending.clients);
            }
            Value::Object(pending.json)
        })
        .collect();

    // --- Balancers & routing ---
    let balancer_rows: Vec<_> = snapshot
        .balancers
        .iter()
        .filter(|b| in_scope("balancer", &b.tag, &b.tenant_id, b.node_id))
        .collect();
    let balancers = compile_balancers(&balancer_rows, &outbound_tags, &mut issues);
    let balancer_tags: BTreeSet<String> = balancers
        .iter()
        .filter_map(|b| b["tag"].as_str().map(str::to_string))
        .collect();

    let document_body = |kind: DocumentKind| {
        snapshot
            .documents
            .iter()
            .filter(|d| d.kind == kind)
            .find(|d| in_scope(kind.as_str(), kind.as_str(), &d.tenant_id, d.node_id))
            .map(|d| &d.body)
    };

    let routing = compile_routing(
        document_body(DocumentKind::Routing),
        user_rules,
        balancers,
        &RuleTargets {
            inbounds: &inbound_tags,
            outbounds: &outbound_tags,
            balancers: &balancer_tags,
        },
        &mut issues,
    );

    // --- Assemble ---
    let mut body = Map::new();
    body.insert("stats".into(), json!({}));
    match document_body(DocumentKind::Policy).map(validate_policy) {
        Some(Ok(policy)) => {
            body.insert("policy".into(), policy);
        }
        Some(Err(e)) => issues.push(e),
        None => {
            body.insert("policy".into(), default_policy());
        }
    }
    match document_body(DocumentKind::Dns).map(validate_dns) {
        Some(Ok(dns)) => {
            body.insert("dns".into(), dns);
        }
        Some(Err(e)) => issues.push(e),
        None => {}
    }
    body.insert("inbounds".into(), Value::Array(inbounds));
    body.insert("outbounds".into(), Value::Array(outbounds));
    body.insert("routing".into(), routing);

    let mut body = Value::Object(body);
    if let Some(overrides) = &node.config_overrides {
        match apply_overrides(&mut body, overrides) {
            Ok(()) => resolve_rule_targets(&mut body, &mut issues),
            Err(e) => issues.push(e),
        }
    }

    CompiledDocument {
        node_id: node.id,
        tenant_id: tenant.clone(),
        version: content_version(&body),
        built_at: now,
        next_expiry,
        body,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Balancer, BalancerStrategy, Client, EntityId, Network, Node, NodeDocument,
        SecurityKind, SecuritySettings, TransportSettings,
    };

    const GIB: u64 = 1024 * 1024 * 1024;

    fn node(tenant: &str) -> Node {
        Node::provision(TenantId::new(tenant), "edge-1", "token".into())
    }

    fn inbound(node: &Node, tag: &str) -> Inbound {
        Inbound {
            id: EntityId::new(),
            tenant_id: node.tenant_id.clone(),
            node_id: node.id,
            tag: tag.into(),
            protocol: "vless".into(),
            port: 443,
            listen: None,
            settings: Some(json!({ "decryption": "none" })),
            transport: TransportSettings::default(),
            security: SecuritySettings::default(),
            sniffing: Default::default(),
            stream_settings: None,
            enabled: true,
            sort_order: 0,
        }
    }

    fn outbound(node: &Node, tag: &str, priority: i32) -> Outbound {
        Outbound {
            id: EntityId::new(),
            tenant_id: node.tenant_id.clone(),
            node_id: node.id,
            tag: tag.into(),
            protocol: "vless".into(),
            settings: None,
            transport: TransportSettings::default(),
            security: SecuritySettings::default(),
            stream_settings: None,
            priority,
            enabled: true,
        }
    }

    fn client(node: &Node, email: &str, tags: &[&str]) -> Client {
        Client {
            id: EntityId::new(),
            tenant_id: node.tenant_id.clone(),
            node_id: node.id,
            email: email.into(),
            uuid: Some(uuid::Uuid::new_v4()),
            password: None,
            flow: None,
            level: 0,
            quota_bytes: 10 * GIB,
            used_bytes: 0,
            expiry: None,
            device_limit: 0,
            enabled: true,
            inbound_tags: tags.iter().map(|t| t.to_string()).collect(),
            outbound_tag: None,
        }
    }

    fn emails(doc: &CompiledDocument, tag: &str) -> Vec<String> {
        doc.body["inbounds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|i| i["tag"] == tag)
            .map(|i| {
                i["settings"]["clients"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|c| c["email"].as_str().unwrap().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_compile_is_idempotent() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(inbound(&n, "in1"));
        snap.clients.push(client(&n, "c@x", &["in1"]));

        let first = compile(&snap, 1_000);
        let second = compile(&snap, 2_000);
        assert_eq!(first.version, second.version);
        assert_eq!(first.body, second.body);
        assert_ne!(first.built_at, second.built_at);
    }

    #[test]
    fn test_row_order_does_not_change_version() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(inbound(&n, "a"));
        snap.inbounds.push(inbound(&n, "b"));
        snap.clients.push(client(&n, "x@x", &["a"]));
        snap.clients.push(client(&n, "y@x", &["a"]));
        let v1 = compile(&snap, 0).version;

        snap.inbounds.reverse();
        snap.clients.reverse();
        assert_eq!(compile(&snap, 0).version, v1);
    }

    #[test]
    fn test_client_bound_to_inbound() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(inbound(&n, "in1"));
        snap.clients.push(client(&n, "c@x", &["in1"]));

        let doc = compile(&snap, 0);
        assert_eq!(emails(&doc, "in1"), vec!["c@x"]);
        assert_eq!(doc.body["inbounds"][0]["settings"]["decryption"], "none");
        assert!(doc.issues.is_empty());
    }

    #[test]
    fn test_unknown_inbound_tag_reports_one_incomplete_error() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(inbound(&n, "in1"));
        snap.clients.push(client(&n, "c@x", &["ghost"]));

        let doc = compile(&snap, 0);
        assert!(emails(&doc, "in1").is_empty());
        assert_eq!(doc.issues.len(), 1);
        assert_eq!(doc.incomplete_count(), 1);
    }

    #[test]
    fn test_client_on_disabled_inbound_is_excluded_silently() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        let mut disabled = inbound(&n, "in2");
        disabled.enabled = false;
        snap.inbounds.push(inbound(&n, "in1"));
        snap.inbounds.push(disabled);
        snap.clients.push(client(&n, "c@x", &["in1", "in2"]));

        let doc = compile(&snap, 0);
        assert_eq!(doc.body["inbounds"].as_array().unwrap().len(), 1);
        assert_eq!(emails(&doc, "in1"), vec!["c@x"]);
        assert!(doc.issues.is_empty());
    }

    #[test]
    fn test_ineligible_clients_are_skipped() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(inbound(&n, "in1"));
        let mut expired = client(&n, "old@x", &["in1"]);
        expired.expiry = Some(10);
        let mut over_quota = client(&n, "heavy@x", &["in1"]);
        over_quota.used_bytes = over_quota.quota_bytes;
        snap.clients.push(expired);
        snap.clients.push(over_quota);
        snap.clients.push(client(&n, "ok@x", &["in1"]));

        let doc = compile(&snap, 100);
        assert_eq!(emails(&doc, "in1"), vec!["ok@x"]);
    }

    #[test]
    fn test_foreign_tenant_rows_are_never_included() {
        let n = node("tenant-a");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(inbound(&n, "in1"));

        let foreign = node("tenant-b");
        let mut foreign_in = inbound(&foreign, "evil-in");
        foreign_in.node_id = n.id;
        let mut foreign_out = outbound(&foreign, "evil-out", 100);
        foreign_out.node_id = n.id;
        let mut foreign_client = client(&foreign, "evil@x", &["in1"]);
        foreign_client.node_id = n.id;
        let foreign_lb = Balancer {
            id: EntityId::new(),
            tenant_id: foreign.tenant_id.clone(),
            node_id: n.id,
            tag: "evil-lb".into(),
            selector: vec!["direct".into()],
            strategy: BalancerStrategy::Random,
            fallback_tag: None,
        };
        snap.inbounds.push(foreign_in);
        snap.outbounds.push(foreign_out);
        snap.clients.push(foreign_client);
        snap.balancers.push(foreign_lb);

        let doc = compile(&snap, 0);
        let text = doc.body.to_string();
        assert!(!text.contains("evil"));
        assert!(emails(&doc, "in1").is_empty());
    }

    #[test]
    fn test_passthrough_blob_beats_structured_columns() {
        let n = node("t1");
        let mut row = inbound(&n, "in1");
        row.transport = TransportSettings {
            network: Network::Ws,
            ws_path: Some("/structured".into()),
            ..Default::default()
        };
        row.security = SecuritySettings {
            kind: SecurityKind::Tls,
            cert_path: Some("/c".into()),
            key_path: Some("/k".into()),
            ..Default::default()
        };
        let blob = json!({ "network": "grpc", "security": "none", "grpcSettings": { "serviceName": "old" } });
        row.stream_settings = Some(blob.clone());
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(row);

        let doc = compile(&snap, 0);
        assert_eq!(doc.body["inbounds"][0]["streamSettings"], blob);
    }

    #[test]
    fn test_outbound_order_and_builtins() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.outbounds.push(outbound(&n, "low", 1));
        snap.outbounds.push(outbound(&n, "high", 10));
        let mut direct = outbound(&n, "direct", 0);
        direct.protocol = "freedom".into();
        snap.outbounds.push(direct);

        let doc = compile(&snap, 0);
        let tags: Vec<&str> = doc.body["outbounds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["tag"].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["high", "low", "direct", "block"]);
    }

    #[test]
    fn test_client_outbound_becomes_user_rule() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(inbound(&n, "in1"));
        snap.outbounds.push(outbound(&n, "exit-jp", 0));
        let mut routed = client(&n, "jp@x", &["in1"]);
        routed.outbound_tag = Some("exit-jp".into());
        let mut dangling = client(&n, "lost@x", &["in1"]);
        dangling.outbound_tag = Some("exit-mars".into());
        snap.clients.push(routed);
        snap.clients.push(dangling);

        let doc = compile(&snap, 0);
        let rules = doc.body["routing"]["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0]["user"], json!(["jp@x"]));
        assert_eq!(rules[0]["outboundTag"], "exit-jp");
        assert_eq!(doc.incomplete_count(), 1);
        assert_eq!(emails(&doc, "in1"), vec!["jp@x", "lost@x"]);
    }

    #[test]
    fn test_documents_and_overrides() {
        let mut n = node("t1");
        n.config_overrides = Some(json!({ "dns": { "queryStrategy": "UseIPv4" } }));
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.documents.push(NodeDocument {
            tenant_id: n.tenant_id.clone(),
            node_id: n.id,
            kind: DocumentKind::Dns,
            body: json!({ "servers": ["8.8.8.8"] }),
        });
        snap.documents.push(NodeDocument {
            tenant_id: n.tenant_id.clone(),
            node_id: n.id,
            kind: DocumentKind::Policy,
            body: json!("broken"),
        });

        let doc = compile(&snap, 0);
        assert_eq!(doc.body["dns"]["servers"], json!(["8.8.8.8"]));
        assert_eq!(doc.body["dns"]["queryStrategy"], "UseIPv4");
        assert!(doc.body.get("policy").is_none());
        assert_eq!(doc.issues.len(), 1);
    }

    #[test]
    fn test_default_policy_when_none_configured() {
        let snap = NodeSnapshot::empty(node("t1"));
        let doc = compile(&snap, 0);
        assert_eq!(doc.body["policy"]["levels"]["0"]["statsUserUplink"], true);
        assert_eq!(doc.body["routing"]["rules"], json!([]));
    }

    #[test]
    fn test_duplicate_tags_resolve_independent_of_row_order() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        let mut first = inbound(&n, "in1");
        first.port = 443;
        let mut second = inbound(&n, "in1");
        second.port = 8443;
        snap.inbounds.push(first);
        snap.inbounds.push(second);
        snap.outbounds.push(outbound(&n, "egress", 1));
        snap.outbounds.push(outbound(&n, "egress", 1));
        snap.clients.push(client(&n, "dup@x", &["in1"]));
        snap.clients.push(client(&n, "dup@x", &["in1"]));
        let a = compile(&snap, 0);

        snap.inbounds.reverse();
        snap.outbounds.reverse();
        snap.clients.reverse();
        let b = compile(&snap, 0);

        assert_eq!(a.version, b.version);
        assert_eq!(a.body["inbounds"][0]["port"], b.body["inbounds"][0]["port"]);
        let duplicates = |doc: &CompiledDocument| {
            doc.issues
                .iter()
                .filter(|i| i.to_string().contains("duplicate"))
                .count()
        };
        assert_eq!(duplicates(&a), 3);
        assert_eq!(duplicates(&b), 3);
    }

    #[test]
    fn test_next_expiry_is_earliest_bound_client_expiry() {
        let n = node("t1");
        let mut snap = NodeSnapshot::empty(n.clone());
        snap.inbounds.push(inbound(&n, "in1"));
        let mut soon = client(&n, "soon@x", &["in1"]);
        soon.expiry = Some(2_000);
        let mut later = client(&n, "later@x", &["in1"]);
        later.expiry = Some(5_000);
        let mut gone = client(&n, "gone@x", &["in1"]);
        gone.expiry = Some(500);
        snap.clients.extend([soon, later, gone]);

        assert_eq!(compile(&snap, 1_000).next_expiry, Some(2_000));
        assert_eq!(compile(&snap, 3_000).next_expiry, Some(5_000));
        assert_eq!(compile(&snap, 6_000).next_expiry, None);
    }

    #[test]
    fn test_override_rules_are_resolved_against_final_tags() {
        let mut n = node("t1");
        n.config_overrides = Some(json!({
            "routing": {
                "rules": [
                    { "type": "field", "domain": ["geosite:ads"], "outboundTag": "block" },
                    { "type": "field", "domain": ["example.com"], "outboundTag": "ghost" },
                    { "type": "field", "ip": ["10.0.0.0/8"], "balancerTag": "nowhere" }
                ]
            }
        }));
        let doc = compile(&NodeSnapshot::empty(n), 0);

        let rules = doc.body["routing"]["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0]["outboundTag"], "block");
        assert_eq!(
            doc.issues.iter().filter(|i| i.code() == "incomplete_config").count(),
            2
        );
    }
}
