//! CLI characterization tests
//!
//! What these tests protect:
//! - Config files, env overrides and registry files resolve the way the
//!   subcommands use them
//! - `replay` of a recorded log renders the same view as the live stream
//! - `check-registry` reports structural and unknown-kind problems
//!
//! What these tests intentionally do NOT assert:
//! - Exact human-readable formatting beyond key markers
//! - Ctrl-C handling

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use unfurl_cli::commands::{check_registry, follow_session};
use unfurl_cli::config::CliConfig;
use unfurl_core::{EngineConfig, FieldRegistry, RegistryProblem, SessionStatus, StreamEngine};
use unfurl_providers::{ReplayTransport, StaticSnapshotSource};

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn config_file_names_the_registry() {
        let registry = write_temp("fields:\n  - path: headline\n    render: heading\n");
        let config = write_temp(&format!(
            "base_url: https://gen.example.com\nregistry: {}\n",
            registry.path().display()
        ));

        let config = CliConfig::load(Some(config.path())).unwrap();
        assert_eq!(config.base_url, "https://gen.example.com");
        let registry = config.load_registry(None).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.match_path("headline").is_some());
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let err = CliConfig::load(Some(std::path::Path::new("/nonexistent/unfurl.yaml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read config"));
    }

    #[test]
    fn invalid_engine_block_is_rejected() {
        let config = write_temp("engine:\n  thinking:\n    start_marker: \"\"\n");
        assert!(CliConfig::load(Some(config.path())).is_err());
    }
}

// =============================================================================
// Replay
// =============================================================================

mod replay {
    use super::*;

    const RECORDED: &str = concat!(
        "{\"type\":\"connected\"}\n",
        "0:\"<think>outline</think>\"\n",
        "0:\"{\\\"title\\\": \\\"Pilot\\\", \\\"characters\\\": [{\\\"name\\\": \\\"Ada\\\"\"\n",
        "0:\"}], \\\"summary\\\": \\\"A start\\\"}\"\n",
        "e:{\"finishReason\":\"stop\"}\n",
    );

    #[tokio::test]
    async fn recorded_log_settles_with_builtin_registry() {
        let log = write_temp(RECORDED);
        let registry = Arc::new(CliConfig::default().load_registry(None).unwrap());
        let transport = ReplayTransport::from_file(log.path()).unwrap();
        let mut engine = StreamEngine::new(
            Arc::new(transport),
            Arc::new(StaticSnapshotSource::failing("none")),
            registry,
        )
        .with_config(EngineConfig::default().with_coalesce_window(Duration::ZERO));

        let mut out = Vec::new();
        let summary = follow_session(&mut engine, "pilot", false, &mut out).await.unwrap();

        assert_eq!(summary.status, SessionStatus::Completed);
        assert!(summary.fields >= 3, "{:?}", summary);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("title <heading> \"Pilot\""));
        assert!(text.contains("characters[0].name <text> \"Ada\""));
        assert!(!text.contains("outline"));
    }
}

// =============================================================================
// Registry check
// =============================================================================

mod check {
    use super::*;

    #[test]
    fn structural_problems_are_reported() {
        let file = write_temp(
            "- path: title\n  render: heading\n- path: title\n  render: text\n- path: \"items[*\"\n  render: text\n",
        );
        let registry = FieldRegistry::load(file.path()).unwrap();
        let problems = check_registry(&registry, &[]);

        assert!(problems
            .iter()
            .any(|p| matches!(p, RegistryProblem::DuplicatePattern { .. })));
        assert!(problems
            .iter()
            .any(|p| matches!(p, RegistryProblem::MalformedWildcard { .. })));
    }

    #[test]
    fn unknown_render_kinds_need_known_list() {
        let file = write_temp("- path: title\n  render: banner\n");
        let registry = FieldRegistry::load(file.path()).unwrap();

        assert!(check_registry(&registry, &[]).is_empty());
        let problems = check_registry(&registry, &["heading".to_string(), "text".to_string()]);
        assert_eq!(problems.len(), 1);
    }
}
