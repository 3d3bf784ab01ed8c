//! End-to-end demo: have a "collaborator" write a quicksort implementation
//! into the workspace, verify it inside the sandbox, and roll the workspace
//! back on failure.
//!
//! The collaborator here is canned rather than model-backed; it stands in
//! for any component that produces untrusted code to be verified.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use ironbox::{Collaborator, DockerSandboxBuilder, RetryHarness, SandboxPolicy};

#[derive(Parser, Debug)]
#[command(name = "quicksort_demo", about = "Sandboxed generate-then-verify demo")]
struct Args {
    /// Image to run verification in.
    #[arg(long, env = "IRONBOX_IMAGE", default_value = "ai-sandbox:py312")]
    image: String,

    /// Host workspace directory.
    #[arg(long, default_value = "./workspace")]
    workspace: String,

    /// Optional YAML policy file; built-in defaults apply when omitted.
    #[arg(long)]
    policy: Option<String>,

    /// Directory for workspace snapshots.
    #[arg(long, default_value = "./snapshots")]
    snapshot_dir: String,

    /// Per-command timeout in seconds.
    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,
}

const QUICKSORT_PY: &str = r#"def quicksort(xs):
    if len(xs) <= 1:
        return list(xs)
    pivot = xs[len(xs) // 2]
    left = [x for x in xs if x < pivot]
    mid = [x for x in xs if x == pivot]
    right = [x for x in xs if x > pivot]
    return quicksort(left) + mid + quicksort(right)
"#;

const VERIFY_PY: &str = r#"import random
from quicksort import quicksort

for _ in range(100):
    xs = [random.randint(-1000, 1000) for _ in range(random.randint(0, 50))]
    assert quicksort(xs) == sorted(xs), xs
assert quicksort([]) == []
assert quicksort([1]) == [1]
print("quicksort verified")
"#;

struct QuicksortCollaborator;

#[async_trait]
impl Collaborator for QuicksortCollaborator {
    async fn prepare(&mut self, workspace: &Path) -> anyhow::Result<()> {
        tokio::fs::write(workspace.join("quicksort.py"), QUICKSORT_PY).await?;
        tokio::fs::write(workspace.join("verify_quicksort.py"), VERIFY_PY).await?;
        Ok(())
    }

    fn verification(&self) -> Vec<String> {
        vec!["python verify_quicksort.py".to_string()]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let policy = match &args.policy {
        Some(path) => SandboxPolicy::from_yaml_file(path)?,
        None => SandboxPolicy::default(),
    };

    let sandbox = DockerSandboxBuilder::new(&args.image, &args.workspace)
        .policy(policy)
        .build()?;

    let harness = RetryHarness::new(&sandbox, &args.snapshot_dir)
        .timeout(Duration::from_secs(args.timeout_secs));

    let mut collaborator = QuicksortCollaborator;
    if harness.drive(&mut collaborator).await? {
        info!("quicksort verified; workspace committed");
        Ok(())
    } else {
        anyhow::bail!("verification did not succeed within the attempt budget")
    }
}
