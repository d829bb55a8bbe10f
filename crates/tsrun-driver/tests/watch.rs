mod common;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{canonical, create_project, sh_options, shell_runner, ShellCompiler};
use tsrun_compiler::{BuildError, CompilerOutput, CompilerService, ModuleLookup};
use tsrun_driver::{ChannelSource, NotifySource, Output, Runner, RunnerError, RunnerOptions, WatchEvent, WatchHandle, WatchState};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn next(handle: &mut WatchHandle) -> WatchEvent {
    tokio::time::timeout(TIMEOUT, handle.next_event())
        .await
        .expect("timed out waiting for a watch event")
        .expect("watch loop ended")
}

async fn expect_build(handle: &mut WatchHandle) -> Vec<std::path::PathBuf> {
    let changed = match next(handle).await {
        WatchEvent::BuildStarted { changed } => changed,
        other => panic!("expected BuildStarted, got {other:?}"),
    };
    match next(handle).await {
        WatchEvent::BuildSucceeded { .. } => {}
        other => panic!("expected BuildSucceeded, got {other:?}"),
    }
    changed
}

fn build_only() -> RunnerOptions {
    sh_options()
        .with_watch(true)
        .with_reexecute(false)
        .with_debounce(Duration::from_millis(50))
}

#[tokio::test]
async fn test_subscribes_to_manifest_and_entry() {
    let project = create_project(&[("main.sh", "#include ./lib.sh\necho $x\n"), ("lib.sh", "x=1\n")]);
    let (source, trigger) = ChannelSource::new();
    let mut handle = shell_runner(project.path().join("main.sh"), build_only()).watch(source);

    assert!(expect_build(&mut handle).await.is_empty());
    assert_eq!(handle.wait_for(WatchState::Watching).await, WatchState::Watching);
    assert_eq!(
        trigger.watched(),
        BTreeSet::from([canonical(&project, "lib.sh"), canonical(&project, "main.sh")])
    );
    assert!(!trigger.notify(project.path().join("unrelated.sh")));

    handle.stop().await.unwrap();
    assert!(trigger.watched().is_empty());
}

#[tokio::test]
async fn test_rapid_changes_coalesce_into_one_rebuild() {
    let project = create_project(&[("main.sh", "#include ./lib.sh\necho $x 0\n"), ("lib.sh", "x=0\n")]);
    let main = canonical(&project, "main.sh");
    let lib = canonical(&project, "lib.sh");
    let (source, trigger) = ChannelSource::new();
    let options = build_only().with_debounce(Duration::from_millis(200));
    let mut handle = shell_runner(&main, options).watch(source);

    expect_build(&mut handle).await;
    handle.wait_for(WatchState::Watching).await;

    for i in 1..=5 {
        fs::write(&main, format!("#include ./lib.sh\necho $x {i}\n")).unwrap();
        fs::write(&lib, format!("x={i}\n")).unwrap();
        assert!(trigger.notify(&main));
        assert!(trigger.notify(&lib));
    }

    let changed = expect_build(&mut handle).await;
    assert_eq!(changed, vec![lib.clone(), main.clone()]);

    handle.wait_for(WatchState::Watching).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(handle.try_next_event().is_none());

    let runner = handle.stop().await.unwrap();
    assert_eq!(runner.output_code().unwrap(), "x=5\n\necho $x 5\n");
}

#[tokio::test]
async fn test_failed_rebuild_keeps_watching_previous_manifest() {
    let project = create_project(&[
        ("main.ts", "import { a } from './a'\nconsole.log(a)\n"),
        ("a.ts", "export const a = 1\n"),
    ]);
    let main = canonical(&project, "main.ts");
    let (source, trigger) = ChannelSource::new();
    let options = RunnerOptions::default()
        .with_watch(true)
        .with_reexecute(false)
        .with_debounce(Duration::from_millis(50));
    let mut handle = Runner::new(&main, options).watch(source);

    expect_build(&mut handle).await;
    handle.wait_for(WatchState::Watching).await;
    let watched = trigger.watched();
    assert_eq!(watched.len(), 2);

    fs::write(&main, "import { a } from './gone'\nconsole.log(a)\n").unwrap();
    assert!(trigger.notify(&main));
    assert!(matches!(next(&mut handle).await, WatchEvent::BuildStarted { .. }));
    match next(&mut handle).await {
        WatchEvent::BuildFailed { error } => assert!(matches!(*error, RunnerError::UnresolvedModule(_))),
        other => panic!("expected BuildFailed, got {other:?}"),
    }
    handle.wait_for(WatchState::Watching).await;
    assert_eq!(trigger.watched(), watched);

    fs::write(&main, "import { a } from './a'\nconsole.log(a + 1)\n").unwrap();
    assert!(trigger.notify(&main));
    expect_build(&mut handle).await;

    let runner = handle.stop().await.unwrap();
    assert!(runner.output_code().unwrap().contains("a + 1"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_rebuild_reexecutes_child() {
    let project = create_project(&[("main.sh", "echo first\n")]);
    let main = canonical(&project, "main.sh");
    let (source, trigger) = ChannelSource::new();
    let options = sh_options().with_watch(true).with_debounce(Duration::from_millis(50));
    let mut handle = shell_runner(&main, options).watch(source);

    expect_build(&mut handle).await;
    assert!(matches!(next(&mut handle).await, WatchEvent::ProcessSpawned { pid: Some(_) }));
    match next(&mut handle).await {
        WatchEvent::ProcessExited { result: Ok(output) } => assert_eq!(output, "first\n"),
        other => panic!("expected ProcessExited, got {other:?}"),
    }

    fs::write(&main, "echo second\n").unwrap();
    assert!(trigger.notify(&main));
    expect_build(&mut handle).await;
    assert!(matches!(next(&mut handle).await, WatchEvent::ProcessSpawned { .. }));
    match next(&mut handle).await {
        WatchEvent::ProcessExited { result: Ok(output) } => assert_eq!(output, "second\n"),
        other => panic!("expected ProcessExited, got {other:?}"),
    }

    let runner = handle.stop().await.unwrap();
    assert_eq!(runner.output(), Some(&Output::Text("second\n".to_string())));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_terminates_child_and_returns_runner() {
    let project = create_project(&[("main.sh", "sleep 30\n")]);
    let (source, _trigger) = ChannelSource::new();
    let mut handle = shell_runner(project.path().join("main.sh"), sh_options().with_watch(true)).watch(source);

    expect_build(&mut handle).await;
    assert!(matches!(next(&mut handle).await, WatchEvent::ProcessSpawned { .. }));

    let runner = tokio::time::timeout(TIMEOUT, handle.stop()).await.unwrap().unwrap();
    assert!(!runner.has_child());
    assert!(runner.output_code().is_some());
}

#[tokio::test]
async fn test_cancel_during_debounce_skips_rebuild() {
    let project = create_project(&[("main.sh", "echo 1\n")]);
    let main = canonical(&project, "main.sh");
    let (source, trigger) = ChannelSource::new();
    let options = build_only().with_debounce(Duration::from_secs(30));
    let mut handle = shell_runner(&main, options).watch(source);

    expect_build(&mut handle).await;
    handle.wait_for(WatchState::Watching).await;
    assert!(trigger.notify(&main));
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.cancellation_token().cancel();
    assert_eq!(handle.wait_for(WatchState::Building).await, WatchState::Stopped);
    assert!(handle.next_event().await.is_none());
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_notify_source_triggers_rebuild() {
    let project = create_project(&[("main.sh", "echo 1\n")]);
    let main = canonical(&project, "main.sh");
    let source = NotifySource::new().unwrap();
    let mut handle = shell_runner(&main, build_only()).watch(source);

    expect_build(&mut handle).await;
    handle.wait_for(WatchState::Watching).await;

    fs::write(&main, "echo 2\n").unwrap();
    let changed = expect_build(&mut handle).await;
    assert_eq!(changed, vec![main.clone()]);

    let runner = handle.stop().await.unwrap();
    assert_eq!(runner.output_code().unwrap(), "echo 2\n");
}

/// Takes a second over any entry that mentions `slow`.
struct SlowCompiler;

impl CompilerService for SlowCompiler {
    fn compile(&self, entry: &Path, lookup: &mut dyn ModuleLookup) -> Result<CompilerOutput, BuildError> {
        if fs::read_to_string(entry).is_ok_and(|source| source.contains("slow")) {
            std::thread::sleep(Duration::from_secs(1));
        }
        ShellCompiler.compile(entry, lookup)
    }
}

#[tokio::test]
async fn test_stop_discards_in_flight_rebuild() {
    let project = create_project(&[("main.sh", "echo 1\n")]);
    let main = canonical(&project, "main.sh");
    let (source, trigger) = ChannelSource::new();
    let mut handle = Runner::with_compiler(&main, build_only(), Arc::new(SlowCompiler)).watch(source);

    expect_build(&mut handle).await;
    handle.wait_for(WatchState::Watching).await;

    fs::write(&main, "echo slow\n").unwrap();
    assert!(trigger.notify(&main));
    assert!(matches!(next(&mut handle).await, WatchEvent::BuildStarted { .. }));
    assert_eq!(handle.state(), WatchState::Building);

    handle.cancellation_token().cancel();
    while let Some(event) = tokio::time::timeout(TIMEOUT, handle.next_event()).await.unwrap() {
        assert!(!matches!(event, WatchEvent::BuildSucceeded { .. }), "unexpected {event:?}");
    }
    let runner = handle.join().await.unwrap();
    assert_eq!(runner.output_code().unwrap(), "echo 1\n");
}
