mod common;

use anyhow::Result;
use std::sync::atomic::Ordering;

use caffe2_rs::inference::{InferenceSession, ProfilerState};
use caffe2_rs::Caffe2Error;

use common::{classifier_options, cpu_only, sample, FakeRuntime, NetFiles};

fn open() -> Result<(NetFiles, std::sync::Arc<FakeRuntime>, InferenceSession)> {
    let files = NetFiles::new();
    let runtime = FakeRuntime::new(3);
    let session = InferenceSession::create(
        runtime.clone(),
        &cpu_only(),
        classifier_options(files.source(), 2, 3),
    )?;
    Ok((files, runtime, session))
}

#[test]
fn read_before_start_is_not_ready() -> Result<()> {
    let (_files, _runtime, mut session) = open()?;
    assert!(matches!(session.read_profile(), Err(Caffe2Error::ProfileNotReady)));
    assert!(matches!(session.end_profiling(), Err(Caffe2Error::ProfileNotReady)));
    assert_eq!(session.profiler().state(), &ProfilerState::Idle);
    Ok(())
}

#[test]
fn empty_profile_round_trip() -> Result<()> {
    let (_files, runtime, mut session) = open()?;
    session.start_profiling("x", "m")?;
    session.end_profiling()?;

    let trace = session.read_profile()?;
    assert!(!trace.is_empty());
    assert_eq!(runtime.outstanding_buffers(), 0);

    let decoded = trace.decode()?;
    assert_eq!(decoded.name, "x");
    assert_eq!(decoded.metadata, "m");
    assert!(decoded.elements.is_empty());
    Ok(())
}

#[test]
fn profile_records_runs() -> Result<()> {
    let (_files, _runtime, mut session) = open()?;
    session.start_profiling("squeezenet", "batch=2")?;
    assert!(session.profiler().is_active());

    session.predict(&[sample(1.0)])?;
    session.predict(&[sample(2.0), sample(0.0)])?;
    session.end_profiling()?;
    assert_eq!(
        session.profiler().state(),
        &ProfilerState::Stopped { pending: true }
    );

    // Runs after the profiler stops are not recorded
    session.predict(&[sample(1.0)])?;

    let trace = session.read_profile()?.decode()?;
    assert_eq!(trace.name, "squeezenet");
    assert!(trace.end >= trace.start);

    let layers = trace.layers();
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0].layer_sequence_index, 1);
    assert_eq!(layers[1].layer_sequence_index, 2);
    assert_eq!(layers[0].shapes, vec![vec![2, 3, 2, 2]]);
    Ok(())
}

#[test]
fn trace_is_read_once() -> Result<()> {
    let (_files, _runtime, mut session) = open()?;
    session.start_profiling("x", "")?;
    session.end_profiling()?;
    session.read_profile()?;

    assert!(matches!(session.read_profile(), Err(Caffe2Error::ProfileNotReady)));
    assert_eq!(
        session.profiler().state(),
        &ProfilerState::Stopped { pending: false }
    );
    Ok(())
}

#[test]
fn start_while_active_is_rejected() -> Result<()> {
    let (_files, _runtime, mut session) = open()?;
    session.start_profiling("first", "")?;

    assert!(matches!(
        session.start_profiling("second", ""),
        Err(Caffe2Error::ProfilingAlreadyActive)
    ));
    match session.profiler().state() {
        ProfilerState::Active { name, .. } => assert_eq!(name, "first"),
        other => panic!("expected an active profiler, got {:?}", other),
    }

    // A stopped profiler may be restarted
    session.end_profiling()?;
    session.start_profiling("second", "")?;
    session.end_profiling()?;
    assert_eq!(session.read_profile()?.decode()?.name, "second");
    Ok(())
}

#[test]
fn disable_discards_trace() -> Result<()> {
    let (_files, runtime, mut session) = open()?;
    session.start_profiling("x", "m")?;
    session.predict(&[sample(1.0)])?;
    session.end_profiling()?;

    session.disable_profiling()?;
    assert_eq!(session.profiler().state(), &ProfilerState::Idle);
    assert!(matches!(session.read_profile(), Err(Caffe2Error::ProfileNotReady)));

    // Disabling from idle is harmless
    session.disable_profiling()?;
    session.close();
    assert_eq!(runtime.deleted.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn interior_nul_rejected() -> Result<()> {
    let (_files, _runtime, mut session) = open()?;
    assert!(matches!(
        session.start_profiling("bad\0name", ""),
        Err(Caffe2Error::Config(_))
    ));
    assert_eq!(session.profiler().state(), &ProfilerState::Idle);
    Ok(())
}
