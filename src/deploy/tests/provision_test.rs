//! Provisioning tests with the real process runtime: first run changes
//! the unsatisfied steps and starts the application, the second run
//! converges with every step unchanged, secrets land with mode 0600, and
//! a failing step aborts the plan.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use deploy::compose::{ComposeSpec, COMPOSE_FILE_NAME};
use deploy::provision::{
    ChannelProgressReporter, HostSpec, ProvisionContext, ProvisionPlan, StepStatus,
};
use deploy::{ContainerState, DeployError, ImageStore, LocalProcessRuntime};
use pipeline::{BuildSpec, ImageBuilder, Pusher};
use registry::store::RegistryStore;
use registry::{Digest, RegistryClient};

async fn spawn_registry() -> (RegistryClient, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RegistryStore::new(temp_dir.path().to_path_buf()).unwrap());
    let (addr, _handle) = registry::server::start_server(store, "127.0.0.1", 0, None)
        .await
        .unwrap();
    let client = RegistryClient::new(&format!("http://{}", addr), None).unwrap();
    (client, temp_dir)
}

/// Push an image whose workload is a plain sleep, so the runtime can
/// actually launch it.
async fn push_sleeper(client: &RegistryClient) -> Digest {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("app.js"), "placeholder\n").unwrap();
    let artifact = ImageBuilder::build(&BuildSpec {
        image_name: "todo/app".to_string(),
        source_dir: source.path().to_path_buf(),
        base_image: "scratch".to_string(),
        exposed_port: 3000,
        cmd: vec!["/bin/sleep".to_string(), "30".to_string()],
        env_keys: vec!["TODO_DATABASE_URL".to_string(), "TODO_PORT".to_string()],
    })
    .unwrap();
    Pusher::new(client.clone())
        .push(&artifact, "latest")
        .await
        .unwrap();
    artifact.manifest_digest
}

/// Runtime state and images live outside the app dir so the app-directory
/// step starts unsatisfied.
fn context(client: RegistryClient, base: &Path) -> ProvisionContext {
    let images = Arc::new(ImageStore::new(base.join("images")).unwrap());
    let runtime =
        Arc::new(LocalProcessRuntime::new(base.join("runtime"), images.clone()).unwrap());
    ProvisionContext {
        host: HostSpec {
            address: "localhost".to_string(),
            elevate: false,
            app_dir: base.join("app"),
            app_user: None,
        },
        compose: ComposeSpec::standard("todo/app:latest", 3199, 3199),
        secret: "file:///data/todos.json".to_string(),
        runtime,
        images,
        client,
    }
}

#[tokio::test]
async fn test_first_run_provisions_and_second_run_converges() {
    let (client, _registry_dir) = spawn_registry().await;
    let digest = push_sleeper(&client).await;

    let base = tempfile::tempdir().unwrap();
    let ctx = context(client, base.path());
    let app_dir = ctx.host.app_dir.clone();

    let (sender, mut receiver) = tokio::sync::mpsc::channel(32);
    let reporter = ChannelProgressReporter::new(sender);

    let plan = ProvisionPlan::standard();
    let report = plan.run(&ctx, &reporter).await.unwrap();
    assert_eq!(report.steps.len(), 6);
    assert!(!report.converged());

    // The runtime answers and no user is designated; everything else was
    // missing and got applied
    let by_name: Vec<(&str, StepStatus)> = report
        .steps
        .iter()
        .map(|s| (s.name.as_str(), s.status))
        .collect();
    assert_eq!(
        by_name,
        vec![
            ("container runtime", StepStatus::Unchanged),
            ("app user", StepStatus::Unchanged),
            ("app directory", StepStatus::Changed),
            ("secrets file", StepStatus::Changed),
            ("compose definition", StepStatus::Changed),
            ("reconcile services", StepStatus::Changed),
        ]
    );

    // Progress was streamed from 0% to done
    let mut progress = Vec::new();
    while let Ok(p) = receiver.try_recv() {
        progress.push(p);
    }
    assert_eq!(progress.first().map(|p| p.percentage), Some(0));
    assert_eq!(progress.last().map(|p| p.percentage), Some(100));

    // The application container runs the resolved digest
    let info = ctx.runtime.inspect("todo-app").await.unwrap().unwrap();
    assert_eq!(info.state, ContainerState::Running);
    assert_eq!(info.spec.image_digest, digest);
    assert_eq!(info.spec.host_port, 3199);
    assert_eq!(
        info.spec.env.get("TODO_DATABASE_URL").map(String::as_str),
        Some("file:///data/todos.json")
    );
    assert_eq!(info.spec.env.get("TODO_PORT").map(String::as_str), Some("3199"));

    // The installed compose file round-trips to the desired spec
    let installed = ComposeSpec::load(&app_dir.join(COMPOSE_FILE_NAME)).await.unwrap();
    assert_eq!(installed, ctx.compose);

    // Second run: everything already satisfied, running service untouched
    let report = plan.run(&ctx, &deploy::LogProgressReporter).await.unwrap();
    assert!(report.converged());
    let info = ctx.runtime.inspect("todo-app").await.unwrap().unwrap();
    assert_eq!(info.state, ContainerState::Running);

    ctx.runtime
        .stop("todo-app", Duration::from_secs(5))
        .await
        .unwrap();
}

#[tokio::test]
#[cfg(unix)]
async fn test_secrets_file_has_mode_0600_and_is_rewritten_on_rotation() {
    use std::os::unix::fs::PermissionsExt;

    let (client, _registry_dir) = spawn_registry().await;
    push_sleeper(&client).await;

    let base = tempfile::tempdir().unwrap();
    let mut ctx = context(client, base.path());
    let app_dir = ctx.host.app_dir.clone();

    let plan = ProvisionPlan::standard();
    plan.run(&ctx, &deploy::LogProgressReporter).await.unwrap();

    let env_path = app_dir.join(".env");
    let mode = std::fs::metadata(&env_path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600, "secrets file mode is {:o}", mode);
    let content = std::fs::read_to_string(&env_path).unwrap();
    assert!(content.contains("TODO_DATABASE_URL=file:///data/todos.json"));
    assert!(content.contains("TODO_PORT=3199"));

    // Rotating the secret makes only the secrets step change again
    ctx.secret = "file:///data/todos-v2.json".to_string();
    let report = plan.run(&ctx, &deploy::LogProgressReporter).await.unwrap();
    let secrets = report
        .steps
        .iter()
        .find(|s| s.name == "secrets file")
        .unwrap();
    assert_eq!(secrets.status, StepStatus::Changed);
    let content = std::fs::read_to_string(&env_path).unwrap();
    assert!(content.contains("todos-v2.json"));

    ctx.runtime
        .stop("todo-app", Duration::from_secs(5))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_user_without_elevation_aborts_the_plan() {
    let (client, _registry_dir) = spawn_registry().await;
    push_sleeper(&client).await;

    let base = tempfile::tempdir().unwrap();
    let mut ctx = context(client, base.path());
    let app_dir = ctx.host.app_dir.clone();
    ctx.host.app_user = Some("no-such-user-for-this-test".to_string());

    let plan = ProvisionPlan::standard();
    match plan.run(&ctx, &deploy::LogProgressReporter).await {
        Err(DeployError::Provision { step, message }) => {
            assert_eq!(step, "app user");
            assert!(message.contains("elevation"), "unexpected message: {}", message);
        }
        other => panic!("Expected Provision error, got: {:?}", other.map(|_| ())),
    }

    // The plan aborted before later steps ran
    assert!(!app_dir.join(COMPOSE_FILE_NAME).exists());
    assert!(ctx.runtime.inspect("todo-app").await.unwrap().is_none());
}
