use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

/// Test context that sets up a temporary cranforge home environment
struct TestContext {
    temp_dir: TempDir,
    home: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let home = temp_dir.path().join(".cranforge");
        std::fs::create_dir_all(&home).expect("failed to create cranforge home");
        Self { temp_dir, home }
    }

    fn cranforge_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_cranforge");
        let mut cmd = Command::new(bin_path);
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("CRANFORGE_HOME", &self.home);
        cmd
    }

    fn write_list(&self, names: &[&str]) -> PathBuf {
        let path = self.temp_dir.path().join("packages.txt");
        std::fs::write(&path, names.join("\n")).expect("failed to write package list");
        path
    }

    fn repo_dir(&self) -> PathBuf {
        self.temp_dir.path().join("repo")
    }
}

const INDEX: &str = "Package: askpass\nVersion: 1.2.0\nImports: sys\n\nPackage: sys\nVersion: 3.4.2\n";

fn mock_index(server: &mut mockito::Server) {
    server
        .mock("GET", "/src/contrib/PACKAGES")
        .with_body(INDEX)
        .create();
}

fn mock_binary(server: &mut mockito::Server, name: &str, version: &str) {
    server
        .mock(
            "GET",
            format!("/bin/x86_64-linux/contrib/{name}_{version}.tar.gz").as_str(),
        )
        .with_body(format!("{name} binary archive"))
        .create();
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx
        .cranforge_cmd()
        .arg("--help")
        .output()
        .expect("failed to run cranforge");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("mirror"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx
        .cranforge_cmd()
        .arg("--version")
        .output()
        .expect("failed to run cranforge");
    assert!(output.status.success());
}

#[test]
fn test_missing_package_list_fails() {
    let ctx = TestContext::new();
    let output = ctx
        .cranforge_cmd()
        .args(["plan", "no-such-list.txt", "--repo-url", "http://127.0.0.1:1"])
        .output()
        .expect("failed to run cranforge");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no-such-list.txt"));
}

#[test]
fn test_plan_prints_dependency_order() {
    let mut server = mockito::Server::new();
    mock_index(&mut server);

    let ctx = TestContext::new();
    let list = ctx.write_list(&["askpass"]);

    let output = ctx
        .cranforge_cmd()
        .arg("plan")
        .arg(&list)
        .args(["--repo-url", &server.url()])
        .output()
        .expect("failed to run cranforge");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("build plan: 2 packages"));
    let sys_pos = stdout.find("sys 3.4.2").expect("sys in plan");
    let askpass_pos = stdout.find("askpass 1.2.0").expect("askpass in plan");
    assert!(sys_pos < askpass_pos, "dependency must precede dependent");
}

#[test]
fn test_unknown_package_aborts_with_its_name() {
    let mut server = mockito::Server::new();
    mock_index(&mut server);

    let ctx = TestContext::new();
    let list = ctx.write_list(&["ghost"]);

    let output = ctx
        .cranforge_cmd()
        .arg("plan")
        .arg(&list)
        .args(["--repo-url", &server.url()])
        .output()
        .expect("failed to run cranforge");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ghost"));
}

#[test]
fn test_mirror_to_local_repo_is_idempotent() {
    let mut server = mockito::Server::new();
    mock_index(&mut server);
    mock_binary(&mut server, "askpass", "1.2.0");
    mock_binary(&mut server, "sys", "3.4.2");

    let ctx = TestContext::new();
    let list = ctx.write_list(&["askpass"]);
    let dest = format!("file:{}", ctx.repo_dir().display());

    let output = ctx
        .cranforge_cmd()
        .arg("mirror")
        .arg(&list)
        .args(["--repo-url", &server.url(), "--dest", &dest])
        .output()
        .expect("failed to run cranforge");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "mirror failed: {stdout}");
    assert!(ctx.repo_dir().join("askpass_1.2.0.tar.gz").exists());
    assert!(ctx.repo_dir().join("sys_3.4.2.tar.gz").exists());
    assert!(stdout.contains("2 uploaded, 0 already present, 0 failed"));

    // Second run leaves the destination unchanged and skips every transfer.
    let output = ctx
        .cranforge_cmd()
        .arg("mirror")
        .arg(&list)
        .args(["--repo-url", &server.url(), "--dest", &dest])
        .output()
        .expect("failed to run cranforge");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("0 uploaded, 2 already present, 0 failed"));
}

#[test]
fn test_failed_package_yields_nonzero_exit_but_publishes_rest() {
    let mut server = mockito::Server::new();
    mock_index(&mut server);
    // sys is present, askpass's binary is missing from the snapshot
    mock_binary(&mut server, "sys", "3.4.2");
    server
        .mock("GET", "/bin/x86_64-linux/contrib/askpass_1.2.0.tar.gz")
        .with_status(404)
        .create();

    let ctx = TestContext::new();
    let list = ctx.write_list(&["askpass"]);
    let dest = format!("file:{}", ctx.repo_dir().display());

    let output = ctx
        .cranforge_cmd()
        .arg("mirror")
        .arg(&list)
        .args(["--repo-url", &server.url(), "--dest", &dest])
        .output()
        .expect("failed to run cranforge");

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("failed     askpass"));
    // the healthy dependency is still published
    assert!(ctx.repo_dir().join("sys_3.4.2.tar.gz").exists());
    assert!(!ctx.repo_dir().join("askpass_1.2.0.tar.gz").exists());
}

#[test]
fn test_publish_without_staging_fails() {
    let ctx = TestContext::new();
    let dest = format!("file:{}", ctx.repo_dir().display());

    let output = ctx
        .cranforge_cmd()
        .args(["publish", "--dest", &dest])
        .output()
        .expect("failed to run cranforge");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nothing staged"));
}

#[test]
fn test_build_then_publish_as_separate_invocations() {
    let mut server = mockito::Server::new();
    mock_index(&mut server);
    mock_binary(&mut server, "sys", "3.4.2");

    let ctx = TestContext::new();
    let list = ctx.write_list(&["sys"]);

    let output = ctx
        .cranforge_cmd()
        .arg("build")
        .arg(&list)
        .args(["--repo-url", &server.url()])
        .output()
        .expect("failed to run cranforge");
    assert!(output.status.success());
    assert!(ctx.home.join("staging/sys_3.4.2.tar.gz").exists());

    let dest = format!("file:{}", ctx.repo_dir().display());
    let output = ctx
        .cranforge_cmd()
        .args(["publish", "--dest", &dest])
        .output()
        .expect("failed to run cranforge");
    assert!(output.status.success());
    assert!(ctx.repo_dir().join("sys_3.4.2.tar.gz").exists());
}
