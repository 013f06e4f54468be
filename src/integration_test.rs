use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::{
    domain::{CompileOptions, Os, Target},
    errors::{Artifact, InstanceError},
    exit::{ExitCondition, ExitReason},
    instance::ExecProgInstance,
    options::{InstanceOptions, ManagerConfig, Timeouts},
    traits::vm::VmError,
};
use crate::native::{compiler::NativeCompiler, reporter::ConsoleReporter, vm::LocalPool};

/// Prints its arguments and the program file, exits 1 if the program asks
/// for it.
const FAKE_EXECPROG: &str = r#"#!/bin/sh
echo "execprog $*"
for last; do :; done
cat "$last"
grep -q EXIT1 "$last" && exit 1
exit 0
"#;

/// Skips tracer flags up to `-f` and runs the rest.
const FAKE_TRACER: &str = r#"#!/bin/sh
while [ "$1" != "-f" ]; do shift; done
shift
echo "traced"
exec "$@"
"#;

struct Fixture {
    dir: TempDir,
    config: Arc<ManagerConfig>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let execprog = write_script(dir.path(), "syz-execprog", FAKE_EXECPROG);
        let executor = write_script(dir.path(), "syz-executor", "#!/bin/sh\n");
        std::fs::create_dir(dir.path().join("vms")).unwrap();
        let config = Arc::new(ManagerConfig {
            target: Target::new(Os::Linux, "amd64"),
            vm_type: "qemu".to_string(),
            execprog_bin: execprog,
            executor_bin: executor,
            sys_executor_bin: None,
            timeouts: Timeouts { slowdown: 1 },
        });
        Fixture { dir, config }
    }

    fn pool(&self) -> LocalPool {
        LocalPool::new(self.dir.path().join("vms"), "/bin/sh")
    }

    fn vm_dirs(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("vms")).unwrap().count()
    }

    async fn instance(&self, options: InstanceOptions) -> ExecProgInstance {
        ExecProgInstance::create(
            &self.pool(),
            0,
            self.config.clone(),
            Arc::new(ConsoleReporter::new()),
            options,
        )
        .await
        .unwrap()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_harness_run_without_crash() {
    let fixture = Fixture::new();
    let inst = fixture.instance(InstanceOptions::default()).await;

    let result = inst
        .run_syz_prog(
            b"getpid()\n",
            Duration::from_secs(10),
            &CompileOptions::default(),
            ExitCondition::HARNESS,
        )
        .await
        .unwrap();

    let output = String::from_utf8(result.output).unwrap();
    assert!(output.starts_with("execprog -executor="));
    assert!(output.contains(" -os=linux -arch=amd64 -type=qemu -timeout_scale=1 "));
    assert!(output.ends_with("getpid()\n"));
    assert!(result.report.is_none());

    assert_eq!(fixture.vm_dirs(), 1);
    inst.close().await;
    assert_eq!(fixture.vm_dirs(), 0);
}

#[tokio::test]
async fn test_harness_run_detects_crash() {
    let fixture = Fixture::new();
    let inst = fixture.instance(InstanceOptions::default()).await;

    let result = inst
        .run_syz_prog(
            b"BUG: KASAN: use-after-free in ext4_fill_super\n",
            Duration::from_secs(10),
            &CompileOptions::default(),
            ExitCondition::HARNESS,
        )
        .await
        .unwrap();

    let report = result.report.unwrap();
    assert_eq!(report.title, "BUG: KASAN: use-after-free in ext4_fill_super");
    inst.close().await;
}

#[tokio::test]
async fn test_harness_error_exit_fails_the_run() {
    let fixture = Fixture::new();
    let inst = fixture.instance(InstanceOptions::default()).await;

    let result = inst
        .run_syz_prog(
            b"EXIT1\n",
            Duration::from_secs(10),
            &CompileOptions::default(),
            ExitCondition::HARNESS,
        )
        .await;

    assert!(matches!(
        result,
        Err(InstanceError::RunInfrastructure(VmError::UnexpectedExit {
            reason: ExitReason::Error
        }))
    ));

    let result = inst
        .run_syz_prog(
            b"EXIT1\n",
            Duration::from_secs(10),
            &CompileOptions::default(),
            ExitCondition::RAW_BINARY,
        )
        .await;
    assert!(result.is_ok());
    inst.close().await;
}

#[tokio::test]
async fn test_traced_run_prefixes_tracer_command() {
    let fixture = Fixture::new();
    let tracer = write_script(fixture.dir.path(), "strace", FAKE_TRACER);
    let inst = fixture
        .instance(InstanceOptions::default().with_tracer_bin(tracer))
        .await;

    let result = inst
        .run_syz_prog(
            b"getpid()\n",
            Duration::from_secs(10),
            &CompileOptions::default(),
            ExitCondition::HARNESS,
        )
        .await
        .unwrap();

    let output = String::from_utf8(result.output).unwrap();
    let (header, rest) = output.split_once("\n\n<...>\n").unwrap();
    assert!(header.contains("/strace -e \\!wait4,clock_nanosleep,nanosleep -s 100 -x -f "));
    assert!(header.contains("/syz-execprog -executor="));
    assert!(rest.starts_with("traced\nexecprog -executor="));
    inst.close().await;
}

#[tokio::test]
async fn test_create_releases_vm_on_missing_binary() {
    let fixture = Fixture::new();
    let mut config = (*fixture.config).clone();
    config.execprog_bin = fixture.dir.path().join("missing-execprog");

    let result = ExecProgInstance::create(
        &fixture.pool(),
        0,
        Arc::new(config),
        Arc::new(ConsoleReporter::new()),
        InstanceOptions::default(),
    )
    .await;

    assert!(matches!(
        result,
        Err(InstanceError::Provisioning {
            artifact: Artifact::Execprog,
            ..
        })
    ));
    assert_eq!(fixture.vm_dirs(), 0);
}

#[tokio::test]
async fn test_compiled_reproducer_may_abort() {
    let fixture = Fixture::new();
    let build_dir = fixture.dir.path().join("build");
    let cc = std::env::var("CC_PATH").unwrap_or_else(|_| "/usr/bin/cc".to_string());
    let options =
        InstanceOptions::default().with_compiler(Arc::new(NativeCompiler::new(&build_dir, cc)));
    let inst = fixture.instance(options).await;

    let source = br#"
        #include <stdio.h>
        #include <stdlib.h>
        int main() {
            printf("reproducing\n");
            fflush(stdout);
            abort();
        }
    "#;
    let result = inst
        .run_c_prog_raw(source, &Target::new(Os::Linux, "amd64"), Duration::from_secs(10))
        .await
        .unwrap();

    assert!(String::from_utf8_lossy(&result.output).contains("reproducing\n"));
    assert!(result.report.is_none());
    assert_eq!(std::fs::read_dir(&build_dir).unwrap().count(), 0);
    inst.close().await;
}
