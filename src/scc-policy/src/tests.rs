//! Policy engine scenario tests.

use chrono::{Duration as ChronoDuration, Utc};

use scc_config::{
    Exception, ExceptionAllow, ExceptionScope, OrganizationConfig, ProjectConfig,
};

use crate::engine::{BlockKind, DenyKind, PolicyInput, compute_effective_config};
use crate::error::PolicyError;

fn org(raw: &str) -> OrganizationConfig {
    OrganizationConfig::from_json(raw).expect("test org config must parse")
}

fn exception(id: &str, scope: ExceptionScope, allow: ExceptionAllow) -> Exception {
    let now = Utc::now();
    Exception {
        id: id.to_string(),
        scope,
        created_at: now,
        expires_at: now + ChronoDuration::hours(24),
        reason: "test".to_string(),
        allow,
    }
}

fn input<'a>(
    org: &'a OrganizationConfig,
    team_name: &'a str,
    exceptions: &'a [Exception],
) -> PolicyInput<'a> {
    PolicyInput {
        org,
        team_name,
        team: org.profile(team_name).expect("team profile"),
        project: None,
        exceptions,
        image: None,
        now: Utc::now(),
    }
}

// S1: a single org marketplace is auto-assumed for bare references.
#[test]
fn bare_ref_assumes_single_marketplace() {
    let org = org(r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "profiles": {"platform": {"additional_plugins": ["api-tools"]}},
        "delegation": {"teams": {"allow_additional_plugins": ["*"]}}
    }"#);

    let effective = compute_effective_config(input(&org, "platform", &[])).unwrap();
    let enabled: Vec<String> = effective.enabled.iter().map(ToString::to_string).collect();
    assert_eq!(enabled, vec!["api-tools@internal"]);
    assert!(
        effective
            .decisions
            .iter()
            .any(|d| d.field == "enabled_plugins"
                && d.value == "api-tools@internal"
                && d.source == "team.platform")
    );
}

// S2: two org marketplaces make a bare reference fatally ambiguous.
#[test]
fn bare_ref_with_two_marketplaces_is_fatal() {
    let org = org(r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {
            "a": {"source": {"source": "github", "repo": "acme/a"}},
            "b": {"source": {"source": "github", "repo": "acme/b"}}
        },
        "profiles": {"platform": {"additional_plugins": ["api-tools"]}},
        "delegation": {"teams": {"allow_additional_plugins": ["*"]}}
    }"#);

    let err = compute_effective_config(input(&org, "platform", &[])).unwrap_err();
    match &err {
        PolicyError::AmbiguousRef { available, .. } => {
            assert_eq!(available, &vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected AmbiguousRef, got {other:?}"),
    }
    let scc: scc_common::SccError = err.into();
    assert_eq!(scc.exit_code(), 3);
}

// S3: security blocks defeat team and project additions; only a policy
// exception clears them.
#[test]
fn security_block_defeats_all_layers() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "profiles": {
            "platform": {
                "additional_plugins": ["crypto-analyzer@internal"],
                "delegation": {"allow_project_overrides": true}
            }
        },
        "security": {"blocked_plugins": ["crypto-*"]},
        "delegation": {"teams": {"allow_additional_plugins": ["*"]}}
    }"#;
    let org = org(raw);
    let project = ProjectConfig {
        additional_plugins: vec!["crypto-analyzer@internal".to_string()],
        ..Default::default()
    };

    let mut base = input(&org, "platform", &[]);
    base.project = Some(&project);

    let effective = compute_effective_config(base).unwrap();
    assert!(effective.enabled.is_empty());
    assert_eq!(effective.blocked.len(), 1);
    let block = &effective.blocked[0];
    assert_eq!(block.item, "crypto-analyzer@internal");
    assert_eq!(block.pattern, "crypto-*");
    assert_eq!(block.kind, BlockKind::Plugin);

    // A local exception cannot clear a security block.
    let local = [exception(
        "local-1",
        ExceptionScope::Local,
        ExceptionAllow {
            plugins: vec!["crypto-*".to_string()],
            ..Default::default()
        },
    )];
    let mut with_local = input(&org, "platform", &local);
    with_local.project = Some(&project);
    let effective = compute_effective_config(with_local).unwrap();
    assert!(effective.enabled.is_empty());
    assert_eq!(effective.blocked.len(), 1);
    assert!(effective.exceptions_applied.is_empty());

    // A policy exception clears it and is recorded.
    let policy = [exception(
        "pol-7",
        ExceptionScope::Policy,
        ExceptionAllow {
            plugins: vec!["crypto-*".to_string()],
            ..Default::default()
        },
    )];
    let mut with_policy = input(&org, "platform", &policy);
    with_policy.project = Some(&project);
    let effective = compute_effective_config(with_policy).unwrap();
    assert_eq!(effective.enabled.len(), 1);
    assert!(effective.blocked.is_empty());
    assert_eq!(effective.exceptions_applied, vec!["pol-7"]);
}

// S4: the stdio gate in its three variants.
#[test]
fn stdio_gate_denies_allows_and_catches_traversal() {
    let denied_org = org(r#"{
        "organization": {"name": "Acme"},
        "profiles": {
            "platform": {
                "additional_mcp_servers": [
                    {"name": "tooling", "type": "stdio", "command": "/usr/local/bin/tool"}
                ]
            }
        },
        "delegation": {"teams": {"allow_additional_mcp_servers": ["*"]}}
    }"#);
    let effective = compute_effective_config(input(&denied_org, "platform", &[])).unwrap();
    assert!(effective.mcp_servers.is_empty());
    let denial = &effective.denied[0];
    assert_eq!(denial.reason, "stdio disabled");
    assert_eq!(denial.kind, DenyKind::StdioDisabled);

    let allowed_org = org(r#"{
        "organization": {"name": "Acme"},
        "profiles": {
            "platform": {
                "additional_mcp_servers": [
                    {"name": "tooling", "type": "stdio", "command": "/usr/local/bin/tool"}
                ]
            }
        },
        "security": {"allow_stdio_mcp": true, "allowed_stdio_prefixes": ["/usr/local/bin/"]},
        "delegation": {"teams": {"allow_additional_mcp_servers": ["*"]}}
    }"#);
    let effective = compute_effective_config(input(&allowed_org, "platform", &[])).unwrap();
    assert_eq!(effective.mcp_servers.len(), 1);
    assert_eq!(effective.mcp_servers[0].name, "tooling");

    let traversal_org = org(r#"{
        "organization": {"name": "Acme"},
        "profiles": {
            "platform": {
                "additional_mcp_servers": [
                    {"name": "sneaky", "type": "stdio", "command": "/usr/local/bin/../etc/passwd"}
                ]
            }
        },
        "security": {"allow_stdio_mcp": true, "allowed_stdio_prefixes": ["/usr/local/bin/"]},
        "delegation": {"teams": {"allow_additional_mcp_servers": ["*"]}}
    }"#);
    let effective = compute_effective_config(input(&traversal_org, "platform", &[])).unwrap();
    assert!(effective.mcp_servers.is_empty());
    let denial = &effective.denied[0];
    assert_eq!(denial.reason, "path outside allowed prefix");
    assert_eq!(denial.kind, DenyKind::PathPrefix);
}

// Property 3: block monotonicity across layers.
#[test]
fn blocked_plugin_stays_blocked_for_every_team() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "defaults": {"enabled_plugins": ["crypto-scan@internal"]},
        "profiles": {
            "alpha": {"additional_plugins": ["crypto-tools@internal"]},
            "beta": {}
        },
        "security": {"blocked_plugins": ["crypto-*"]},
        "delegation": {"teams": {"allow_additional_plugins": ["*"]}}
    }"#;
    let org = org(raw);

    for team in ["alpha", "beta"] {
        let effective = compute_effective_config(input(&org, team, &[])).unwrap();
        assert!(
            effective.enabled.iter().all(|r| !r.name().starts_with("crypto")),
            "team {team} must not see crypto plugins"
        );
        assert!(!effective.blocked.is_empty());
    }
}

// Property 4: delegation monotonicity for project additions.
#[test]
fn project_addition_denied_without_full_delegation_chain() {
    // Team delegated, but project overrides not granted.
    let no_overrides = org(r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "profiles": {"platform": {}},
        "delegation": {"teams": {"allow_additional_plugins": ["platform"]}}
    }"#);
    // Project overrides granted, but team not delegated.
    let no_team_delegation = org(r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "profiles": {"platform": {"delegation": {"allow_project_overrides": true}}},
        "delegation": {"teams": {}}
    }"#);

    let project = ProjectConfig {
        additional_plugins: vec!["extra-tool@internal".to_string()],
        ..Default::default()
    };

    for org in [&no_overrides, &no_team_delegation] {
        let mut base = input(org, "platform", &[]);
        base.project = Some(&project);
        let effective = compute_effective_config(base).unwrap();
        assert!(effective.enabled.is_empty());
        assert_eq!(effective.denied.len(), 1);
        assert_eq!(effective.denied[0].kind, DenyKind::Delegation);
    }
}

// A local exception restores a delegation denial (and only that).
#[test]
fn local_exception_clears_delegation_denial() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "profiles": {"platform": {"additional_plugins": ["api-tools@internal"]}},
        "delegation": {"teams": {}}
    }"#;
    let org = org(raw);

    let effective = compute_effective_config(input(&org, "platform", &[])).unwrap();
    assert!(effective.enabled.is_empty());
    assert_eq!(effective.denied[0].kind, DenyKind::Delegation);

    let local = [exception(
        "local-2",
        ExceptionScope::Local,
        ExceptionAllow {
            plugins: vec!["api-tools@internal".to_string()],
            ..Default::default()
        },
    )];
    let effective = compute_effective_config(input(&org, "platform", &local)).unwrap();
    assert_eq!(effective.enabled.len(), 1);
    assert_eq!(effective.exceptions_applied, vec!["local-2"]);
}

// Property 10: expiry disables an exception entirely.
#[test]
fn expired_exception_has_no_effect() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "profiles": {"platform": {"additional_plugins": ["crypto-x@internal"]}},
        "security": {"blocked_plugins": ["crypto-*"]},
        "delegation": {"teams": {"allow_additional_plugins": ["*"]}}
    }"#;
    let org = org(raw);

    let mut expired = exception(
        "pol-old",
        ExceptionScope::Policy,
        ExceptionAllow {
            plugins: vec!["crypto-*".to_string()],
            ..Default::default()
        },
    );
    expired.created_at = Utc::now() - ChronoDuration::hours(48);
    expired.expires_at = Utc::now() - ChronoDuration::hours(1);

    let exceptions = [expired];
    let effective = compute_effective_config(input(&org, "platform", &exceptions)).unwrap();
    assert!(effective.enabled.is_empty());
    assert_eq!(effective.blocked.len(), 1);
    assert!(effective.exceptions_applied.is_empty());
}

// Blocked base images respect tag normalization and policy exceptions.
#[test]
fn image_blocks_normalize_tags() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "profiles": {"platform": {}},
        "security": {"blocked_base_images": ["dev-image"]}
    }"#;
    let org = org(raw);

    let mut base = input(&org, "platform", &[]);
    base.image = Some("dev-image");
    let effective = compute_effective_config(base).unwrap();
    let block = effective.image_blocked().expect("image must be blocked");
    assert_eq!(block.item, "dev-image:latest");
    assert_eq!(block.kind, BlockKind::BaseImage);

    let policy = [exception(
        "pol-img",
        ExceptionScope::Policy,
        ExceptionAllow {
            base_images: vec!["dev-image".to_string()],
            ..Default::default()
        },
    )];
    let mut cleared = input(&org, "platform", &policy);
    cleared.image = Some("dev-image");
    let effective = compute_effective_config(cleared).unwrap();
    assert!(effective.image_blocked().is_none());
    assert_eq!(effective.exceptions_applied, vec!["pol-img"]);
}

// Blocked HTTP MCP servers match on name or URL host.
#[test]
fn http_mcp_servers_match_blocklist_by_name_and_host() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "profiles": {
            "platform": {
                "additional_mcp_servers": [
                    {"name": "search", "type": "http", "url": "https://mcp.banned.example/v1"},
                    {"name": "banned-tools", "type": "sse", "url": "https://ok.example/v1"},
                    {"name": "fine", "type": "http", "url": "https://mcp.acme.dev/v1"}
                ]
            }
        },
        "security": {"blocked_mcp_servers": ["banned-*", "*.banned.example"]},
        "delegation": {"teams": {"allow_additional_mcp_servers": ["*"]}}
    }"#;
    let org = org(raw);

    let effective = compute_effective_config(input(&org, "platform", &[])).unwrap();
    let names: Vec<_> = effective.mcp_servers.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["fine"]);
    assert_eq!(
        effective
            .blocked
            .iter()
            .filter(|b| b.kind == BlockKind::McpServer)
            .count(),
        2
    );
}

// Team-disabled patterns remove org defaults.
#[test]
fn disabled_patterns_remove_defaults() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "defaults": {"enabled_plugins": ["api-tools@internal", "db-tools@internal"]},
        "profiles": {"platform": {"disabled_plugins": ["db-*"]}}
    }"#;
    let org = org(raw);

    let effective = compute_effective_config(input(&org, "platform", &[])).unwrap();
    let enabled: Vec<String> = effective.enabled.iter().map(ToString::to_string).collect();
    assert_eq!(enabled, vec!["api-tools@internal"]);
}

// The allowed-plugins restriction records denials.
#[test]
fn allowed_set_restricts_and_records() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "defaults": {
            "enabled_plugins": ["api-tools@internal", "rogue@internal"],
            "allowed_plugins": ["api-*"]
        },
        "profiles": {"platform": {}}
    }"#;
    let org = org(raw);

    let effective = compute_effective_config(input(&org, "platform", &[])).unwrap();
    assert_eq!(effective.enabled.len(), 1);
    let denial = &effective.denied[0];
    assert_eq!(denial.item, "rogue@internal");
    assert_eq!(denial.reason, "not in allowed set");
    assert_eq!(denial.kind, DenyKind::NotAllowed);
}

// Session settings resolve last-wins and land in the effective config.
#[test]
fn session_settings_resolve_with_project_last() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "defaults": {"session": {"timeout_hours": 8, "expected_duration_hours": 2}},
        "profiles": {"platform": {"session": {"timeout_hours": 6}, "delegation": {"allow_project_overrides": true}}},
        "delegation": {"teams": {"allow_additional_plugins": ["*"]}}
    }"#;
    let org = org(raw);
    let project = ProjectConfig {
        session: scc_config::SessionSettings {
            timeout_hours: Some(3),
            ..Default::default()
        },
        ..Default::default()
    };

    let mut base = input(&org, "platform", &[]);
    base.project = Some(&project);
    let effective = compute_effective_config(base).unwrap();
    assert_eq!(effective.session.timeout_hours, 3);
    assert_eq!(effective.session.expected_duration_hours, 2);
}

// Required marketplaces exclude the implicit set.
#[test]
fn required_marketplaces_exclude_implicit() {
    let raw = r#"{
        "organization": {"name": "Acme"},
        "marketplaces": {"internal": {"source": {"source": "github", "repo": "acme/plugins"}}},
        "defaults": {"enabled_plugins": ["api-tools@internal", "helper@claude-plugins-official"]},
        "profiles": {"platform": {}}
    }"#;
    let org = org(raw);

    let effective = compute_effective_config(input(&org, "platform", &[])).unwrap();
    let required = effective.required_marketplaces();
    assert!(required.contains("internal"));
    assert!(!required.iter().any(|m| m == "claude-plugins-official"));
}
