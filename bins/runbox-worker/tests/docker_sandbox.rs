//! End-to-end sandbox runs against a real Docker daemon.
//!
//! Needs the `code-runner-python`, `code-runner-cpp` and `code-runner-java`
//! images built locally. Run with `cargo test -- --ignored`.

use runbox_common::languages::LanguageRegistry;
use runbox_common::types::{ExecutionStatus, Job, TIME_LIMIT_EXCEEDED};
use runbox_worker::{DockerRuntime, MountSource, Sandbox};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sandbox(root: &Path) -> Sandbox<DockerRuntime> {
    let runtime = DockerRuntime::connect().expect("docker daemon reachable");
    Sandbox::new(
        Arc::new(runtime),
        Arc::new(LanguageRegistry::builtin()),
        root.to_path_buf(),
        MountSource::Bind(root.to_path_buf()),
    )
}

fn assert_no_workspace(root: &Path, job: &Job) {
    assert!(
        !root.join(job.id.to_string()).exists(),
        "workspace for {} still on disk",
        job.id
    );
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn python_prints_four() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let job = Job::new("python", "print(2+2)", 5000);

    let result = sandbox.run(&job).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.output, "4\n");
    assert_no_workspace(root.path(), &job);
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn cpp_prints_four() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let job = Job::new(
        "cpp",
        "#include <iostream>\nint main() { std::cout << 2 + 2 << std::endl; }\n",
        10000,
    );

    let result = sandbox.run(&job).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.output, "4\n");
    assert_no_workspace(root.path(), &job);
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn java_solution_says_hello() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let job = Job::new(
        "java",
        "public class Solution {\n  public static void main(String[] args) {\n    System.out.println(\"Hello\");\n  }\n}\n",
        15000,
    );

    let result = sandbox.run(&job).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.output, "Hello\n");
    assert_no_workspace(root.path(), &job);
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn cpp_infinite_loop_times_out() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let job = Job::new("cpp", "int main() { while (true) {} }\n", 3000);

    let started = Instant::now();
    let result = sandbox.run(&job).await;

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert_eq!(result.status.reported(), "error");
    assert_eq!(result.output, TIME_LIMIT_EXCEEDED);
    assert!(started.elapsed() < Duration::from_secs(3 + 10));
    assert_no_workspace(root.path(), &job);

    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    let name = format!("runbox-{}", job.id);
    assert!(docker.inspect_container(&name, None).await.is_err());
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn runtime_error_is_captured_as_success() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let job = Job::new("python", "print('before')\n1/0\n", 5000);

    let result = sandbox.run(&job).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.output.contains("before"));
    assert!(result.output.contains("ZeroDivisionError"));
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn network_is_disabled() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let source = "import socket\ntry:\n    socket.create_connection(('1.1.1.1', 53), timeout=2)\n    print('connected')\nexcept OSError:\n    print('offline')\n";
    let job = Job::new("python", source, 10000);

    let result = sandbox.run(&job).await;

    assert_eq!(result.output.trim(), "offline");
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn fork_bomb_is_contained_and_next_job_runs() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let bomb = "import os\nwhile True:\n    try:\n        os.fork()\n    except OSError:\n        pass\n";

    let first = sandbox.run(&Job::new("python", bomb, 3000)).await;
    assert_eq!(first.output, TIME_LIMIT_EXCEEDED);

    let next = Job::new("python", "print(2+2)", 5000);
    let result = sandbox.run(&next).await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.output, "4\n");
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn concurrent_jobs_keep_their_own_output() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(sandbox(root.path()));

    let mut handles = Vec::new();
    for i in 0..20 {
        let sandbox = sandbox.clone();
        handles.push(tokio::spawn(async move {
            let job = Job::new("python", format!("print({})", i), 15000);
            (i, sandbox.run(&job).await)
        }));
    }

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert_eq!(result.output, format!("{}\n", i));
    }
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires docker daemon and code-runner images"]
async fn redelivery_replaces_leftover_container() {
    let root = tempfile::tempdir().unwrap();
    let sandbox = sandbox(root.path());
    let job = Job::new("python", "print(2+2)", 5000);

    // container of an attempt whose worker died before removing it
    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    let options = bollard::container::CreateContainerOptions {
        name: format!("runbox-{}", job.id),
        platform: None,
    };
    let config = bollard::container::Config::<String> {
        image: Some("code-runner-python".to_string()),
        cmd: Some(vec!["true".to_string()]),
        ..Default::default()
    };
    docker.create_container(Some(options), config).await.unwrap();

    let result = sandbox.run(&job).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.output, "4\n");
    assert_no_workspace(root.path(), &job);
}
