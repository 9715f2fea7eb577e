//! End-to-end session scenarios through the public registry API on the
//! virtual backend.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use shellbox::config::Config;
use shellbox::registry::SessionRegistry;
use shellbox::runtime::{transfer, EmulatedRuntime, FileRecord, Runtime};

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

fn config(mirrors: &TempDir, forward_unknown: bool) -> Config {
    let mut config = Config::default();
    config.emulated.mirror_dir = Some(mirrors.path().to_path_buf());
    config.emulated.forward_unknown = forward_unknown;
    config
}

fn registry(config: &Config) -> SessionRegistry {
    let runtime: Arc<dyn Runtime> = Arc::new(EmulatedRuntime::new(config));
    SessionRegistry::new(runtime, config.sandbox_spec("template").unwrap())
}

async fn run(registry: &SessionRegistry, session: &str, command: &str) -> (String, String, i32) {
    let r = registry.execute(session, command, None).await.unwrap();
    (r.stdout, r.stderr, r.exit_code)
}

// -----------------------------------------------------------------------------
// Session lifecycle
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_first_session_walkthrough() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));

    let first = registry.get_or_create("s1").await.unwrap();
    let again = registry.get_or_create("s1").await.unwrap();
    assert_eq!(first.name, again.name);
    assert_eq!(first.created_at, again.created_at);

    assert_eq!(run(&registry, "s1", "pwd").await.0, "/app\n");
    assert_eq!(run(&registry, "s1", "echo Hello").await.0, "Hello\n");

    let (_, _, code) = run(
        &registry,
        "s1",
        "mkdir -p src/components && touch src/components/Header.tsx",
    )
    .await;
    assert_eq!(code, 0);
    let (stdout, _, _) = run(&registry, "s1", "ls src/components").await;
    assert!(stdout.contains("Header.tsx"));

    registry.remove_container("s1").await.unwrap();
    let err = registry.execute("s1", "pwd", None).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_concurrent_resolution_creates_one_sandbox() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_create("shared").await })
        })
        .collect();

    let mut created = Vec::new();
    for task in tasks {
        created.push(task.await.unwrap().unwrap().created_at);
    }
    assert!(created.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(registry.sessions().len(), 1);
    assert_eq!(registry.runtime().list_containers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_recreated_session_starts_fresh() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));

    registry.get_or_create("s1").await.unwrap();
    run(&registry, "s1", "echo scratch > scratch.txt").await;
    registry.remove_container("s1").await.unwrap();
    // Removing twice is fine.
    registry.remove_container("s1").await.unwrap();

    registry.get_or_create("s1").await.unwrap();
    let (_, _, code) = run(&registry, "s1", "cat scratch.txt").await;
    assert_eq!(code, 1);
    let (_, _, code) = run(&registry, "s1", "cat package.json").await;
    assert_eq!(code, 0);
}

#[tokio::test]
async fn test_sessions_do_not_share_files() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));

    registry.get_or_create("a").await.unwrap();
    registry.get_or_create("b").await.unwrap();
    run(&registry, "a", "echo only-a > mine.txt").await;

    assert_eq!(run(&registry, "a", "cat mine.txt").await.0, "only-a\n");
    assert_eq!(run(&registry, "b", "cat mine.txt").await.2, 1);
}

// -----------------------------------------------------------------------------
// Shell behaviour
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_seeded_project_is_searchable() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));
    registry.get_or_create("s1").await.unwrap();

    let (stdout, _, code) = run(&registry, "s1", "grep react package.json").await;
    assert_eq!(code, 0);
    assert!(stdout.contains("\"react\": \"^18.2.0\""));

    let (stdout, _, _) = run(&registry, "s1", "ls -la").await;
    for name in ["package.json", "index.html", "src"] {
        assert!(stdout.contains(name), "missing {name} in {stdout}");
    }
}

#[tokio::test]
async fn test_directory_edge_cases() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));
    registry.get_or_create("s1").await.unwrap();

    for _ in 0..2 {
        assert_eq!(run(&registry, "s1", "mkdir -p a/b/c").await.2, 0);
    }

    let (_, stderr, code) = run(&registry, "s1", "rm a").await;
    assert_eq!(code, 1);
    assert!(stderr.contains("Is a directory"));

    assert_eq!(run(&registry, "s1", "rm -rf a").await.2, 0);
    assert_eq!(run(&registry, "s1", "ls a").await.2, 2);
}

#[tokio::test]
async fn test_heredoc_preserves_content() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));
    registry.get_or_create("s1").await.unwrap();

    let body = "const a = 'x';\nconst b = \"$HOME\";\n`tpl ${a}`\n";
    let command = format!("cat > src/util.ts << 'EOF'\n{body}EOF");
    assert_eq!(run(&registry, "s1", &command).await.2, 0);
    assert_eq!(run(&registry, "s1", "cat src/util.ts").await.0, body);
}

#[tokio::test]
async fn test_and_chain_stops_at_first_failure() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));
    registry.get_or_create("s1").await.unwrap();

    let (stdout, _, code) = run(&registry, "s1", "cat nope && echo unreachable").await;
    assert_eq!(code, 1);
    assert!(!stdout.contains("unreachable"));

    let (stdout, _, code) = run(&registry, "s1", "cd src && pwd").await;
    assert_eq!(code, 0);
    assert_eq!(stdout, "/app/src\n");
    // Working directory persists between calls.
    assert_eq!(run(&registry, "s1", "pwd").await.0, "/app/src\n");
}

// -----------------------------------------------------------------------------
// File transfer
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_upload_and_download() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));
    registry.get_or_create("s1").await.unwrap();

    let files = vec![
        FileRecord::new("src/new/Button.tsx", "export const Button = () => null;\n"),
        FileRecord::new("/app/data.bin", vec![0u8, 159, 146, 150, 255]),
    ];
    registry.upload_files("s1", &files).await.unwrap();

    let (stdout, _, _) = run(&registry, "s1", "cat src/new/Button.tsx").await;
    assert_eq!(stdout, "export const Button = () => null;\n");

    let back = registry
        .download_files("s1", &["/app/data.bin".to_string()])
        .await
        .unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].content, vec![0u8, 159, 146, 150, 255]);

    let err = registry
        .download_files("s1", &["missing.txt".to_string()])
        .await
        .unwrap_err();
    assert!(err.is_transfer());
}

#[tokio::test]
async fn test_base64_transfer_commands_round_trip() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));
    registry.get_or_create("s1").await.unwrap();

    let content = "it's \"quoted\" with $vars and `ticks`\nEOF\nSHELLBOX\n".as_bytes();
    for command in transfer::upload_commands("/app/notes/odd name.txt", content, None) {
        let (_, stderr, code) = run(&registry, "s1", &command).await;
        assert_eq!(code, 0, "{stderr}");
    }

    let (stdout, _, _) = run(
        &registry,
        "s1",
        &transfer::size_command("/app/notes/odd name.txt"),
    )
    .await;
    assert_eq!(transfer::parse_size(&stdout), Some(content.len() as u64));

    let (stdout, _, _) = run(
        &registry,
        "s1",
        &transfer::download_command("/app/notes/odd name.txt"),
    )
    .await;
    assert_eq!(transfer::decode_payload(&stdout).unwrap(), content);
}

// -----------------------------------------------------------------------------
// Introspection
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_url_and_stats() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, false));
    registry.get_or_create("s1").await.unwrap();

    assert_eq!(
        registry.container_url("s1").await.unwrap(),
        "http://localhost:3000"
    );
    assert!(registry.dev_server_info("s1").await.unwrap().is_none());

    let stats = registry.container_stats("s1").await.unwrap();
    assert_eq!(stats.memory_limit, 2 * 1024 * 1024 * 1024);
    assert!(stats.memory_usage > 0);

    let err = registry.container_stats("other").await.unwrap_err();
    assert!(err.is_not_found());
}

// -----------------------------------------------------------------------------
// Host processes
// -----------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn test_slow_command_times_out_and_session_survives() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, true));
    registry.get_or_create("s1").await.unwrap();

    let err = registry
        .execute("s1", "sleep 5", Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(registry.runtime().is_container_running("s1").await);

    assert_eq!(run(&registry, "s1", "echo still here").await.0, "still here\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_remove_cancels_running_command() {
    let mirrors = TempDir::new().unwrap();
    let registry = registry(&config(&mirrors, true));
    registry.get_or_create("s1").await.unwrap();

    let pending = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.execute("s1", "sleep 30", None).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    registry.remove_container("s1").await.unwrap();
    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(!registry.runtime().is_container_running("s1").await);
    assert!(registry.sessions().is_empty());
}
