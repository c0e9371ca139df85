use llama_launcher::*;

use crate::common::*;

fn state_of(session: &ChatSession) -> &'static str {
    session.state().name()
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn confirming_quantization_loads_the_derived_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path(), "model.fp16.gguf", 1);
    let (backend, probe) = FakeBackend::new("Hello there.");
    let (mut session, mut events) = session(backend, fake_quantizer(dir.path()));

    let selected = session.select_path(&source).unwrap();
    assert_eq!(selected.format, ModelFormat::RawFp16);
    assert_eq!(
        session.submit("hi").unwrap(),
        Submission::ConfirmQuantize(selected.clone())
    );
    session.confirm_quantize(QuantFormat::Q4_K_M).unwrap();
    let seen = settle(&mut session, &mut events).await;

    let derived = dir.path().join("model.Q4_K_M.gguf");
    assert!(derived.is_file());
    assert!(seen
        .iter()
        .any(|e| matches!(e, WorkerEvent::Quantized(r) if r.path == derived)));
    assert_eq!(probe.loaded_paths(), vec![derived.clone()]);
    assert_eq!(session.flow().selected().map(|r| &r.path), Some(&derived));
    assert!(session.state().is_idle());

    let messages = session.transcript().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "hi");
    assert_eq!(messages[1].text, "Hello there.");
}

#[tokio::test]
async fn declining_quantization_loads_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path(), "model.fp16.gguf", 1);
    let (backend, probe) = FakeBackend::new("ok");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&source).unwrap();
    session.submit("hi").unwrap();
    session.decline_quantize().unwrap();
    assert_eq!(state_of(&session), "loading the model");
    settle(&mut session, &mut events).await;

    assert_eq!(probe.loaded_paths(), vec![source.clone()]);
    assert_eq!(session.transcript().len(), 2);

    // loaded now, so the next message does not ask again
    assert!(matches!(
        session.submit("more").unwrap(),
        Submission::Dispatch(_)
    ));
    settle(&mut session, &mut events).await;
    assert_eq!(probe.loads(), 1);
}

#[tokio::test]
async fn missing_quantize_executable_is_an_error_with_empty_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path(), "model.fp16.gguf", 1);
    let (backend, probe) = FakeBackend::new("unused");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&source).unwrap();
    session.submit("hi").unwrap();
    session.confirm_quantize(QuantFormat::Q4_K_M).unwrap();
    let seen = settle(&mut session, &mut events).await;

    match seen.last() {
        Some(WorkerEvent::Failed(e)) => {
            assert!(matches!(**e, LauncherError::QuantizeExecutableMissing { .. }))
        }
        other => panic!("unexpected last event {other:?}"),
    }
    assert!(matches!(session.state(), ChatState::Error(_)));
    assert!(session.transcript().is_empty());
    assert_eq!(probe.loads(), 0);

    session.dismiss_error();
    assert!(session.state().is_idle());
}

#[tokio::test]
async fn quantized_model_is_loaded_once_for_many_messages() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), "tiny.Q4_K_M.gguf", 15);
    let (backend, probe) = FakeBackend::new("sure");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&model).unwrap();
    for text in ["one", "two", "three"] {
        assert!(matches!(session.submit(text).unwrap(), Submission::Dispatch(_)));
        settle(&mut session, &mut events).await;
    }
    assert_eq!(probe.loads(), 1);
    assert_eq!(session.transcript().len(), 6);

    let prompts: Vec<_> = probe.requests().into_iter().map(|r| r.prompt).collect();
    assert_eq!(prompts[0], "User: one\nAssistant:");
    assert_eq!(
        prompts[2],
        "User: one\nAssistant: sure\nUser: two\nAssistant: sure\nUser: three\nAssistant:"
    );
}

#[tokio::test]
async fn switching_models_releases_the_previous_context_first() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_model(dir.path(), "a.Q4_K_M.gguf", 15);
    let b = write_model(dir.path(), "b.Q8_0.gguf", 7);
    let (backend, probe) = FakeBackend::new("ok");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&a).unwrap();
    session.submit("hi").unwrap();
    settle(&mut session, &mut events).await;

    session.select_path(&b).unwrap();
    session.submit("hi again").unwrap();
    let seen = settle(&mut session, &mut events).await;

    assert!(seen.iter().any(|e| matches!(e, WorkerEvent::Released)));
    assert_eq!(probe.loaded_paths(), vec![a, b.clone()]);
    assert_eq!(probe.max_alive(), 1);
    assert_eq!(probe.alive(), 1);
    assert_eq!(session.flow().loaded().map(|r| &r.path), Some(&b));
}

#[tokio::test]
async fn second_message_while_busy_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), "tiny.Q4_K_M.gguf", 15);
    let (backend, probe) = FakeBackend::new("first answer");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&model).unwrap();
    session.submit("first").unwrap();
    let err = session.submit("second").unwrap_err();
    assert!(matches!(err, LauncherError::Busy { .. }));
    settle(&mut session, &mut events).await;

    assert_eq!(probe.requests().len(), 1);
    let texts: Vec<_> = session
        .transcript()
        .messages()
        .iter()
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(texts, ["first", "first answer"]);
}

#[tokio::test]
async fn replies_are_bounded_by_the_token_limit() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), "tiny.Q4_K_M.gguf", 15);
    let (backend, probe) = FakeBackend::new("runaway");
    let (mut session, mut events) =
        session(backend.reporting_tokens(TOKEN_LIMIT + 1), missing_quantizer(dir.path()));

    session.select_path(&model).unwrap();
    session.submit("talk forever").unwrap();
    let seen = settle(&mut session, &mut events).await;

    assert!(matches!(
        seen.last(),
        Some(WorkerEvent::Failed(e)) if matches!(**e, LauncherError::Generation(_))
    ));
    assert!(session.transcript().is_empty());
    assert!(probe
        .requests()
        .iter()
        .all(|r| r.max_tokens <= TOKEN_LIMIT));
}

#[tokio::test]
async fn model_deleted_after_selection_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), "tiny.Q4_K_M.gguf", 15);
    let (backend, probe) = FakeBackend::new("unused");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&model).unwrap();
    std::fs::remove_file(&model).unwrap();
    session.submit("hi").unwrap();
    let seen = settle(&mut session, &mut events).await;

    assert!(matches!(
        seen.last(),
        Some(WorkerEvent::Failed(e)) if matches!(
            **e,
            LauncherError::Load { reason: LoadFailure::NotFound, .. }
        )
    ));
    assert_eq!(probe.loads(), 0);
    assert!(session.transcript().is_empty());
}

#[test]
fn selecting_while_busy_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), "tiny.Q4_K_M.gguf", 15);
    let other = write_model(dir.path(), "other.Q4_K_M.gguf", 15);
    let (backend, _probe) = FakeBackend::new("ok");
    let (mut session, _events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&model).unwrap();
    session.submit("hi").unwrap();
    assert!(matches!(
        session.select_path(&other),
        Err(LauncherError::Busy { .. })
    ));
    assert_eq!(session.flow().selected().map(|r| &r.path), Some(&model));
}

#[tokio::test]
async fn shutdown_releases_the_loaded_model() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), "model.Q4_K_M.gguf", 15);
    let (backend, probe) = FakeBackend::new("ok");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&model).unwrap();
    session.submit("hi").unwrap();
    settle(&mut session, &mut events).await;
    assert_eq!(probe.alive(), 1);

    session.shutdown();
    assert_eq!(probe.alive(), 0);
    assert_eq!(probe.loads(), 1);
    // the worker is gone; a second shutdown is a no-op
    session.shutdown();
}

#[tokio::test]
async fn dropping_the_session_releases_the_loaded_model() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), "model.Q4_K_M.gguf", 15);
    let (backend, probe) = FakeBackend::new("ok");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    session.select_path(&model).unwrap();
    session.submit("hi").unwrap();
    settle(&mut session, &mut events).await;

    drop(session);
    assert_eq!(probe.alive(), 0);
    assert_eq!(probe.max_alive(), 1);
}

#[cfg(unix)]
#[test]
#[serial_test::serial]
fn shutdown_abandons_a_running_quantization() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path(), "model.fp16.gguf", 1);
    let exe = write_script(dir.path(), "llama-quantize", "touch \"$2\"\nexec sleep 30");
    let quantizer = QuantizeInvoker::new(exe, std::time::Duration::from_secs(60));
    let (backend, probe) = FakeBackend::new("unused");
    let (mut session, _events) = session(backend, quantizer);

    session.select_path(&source).unwrap();
    session.submit("hi").unwrap();
    session.confirm_quantize(QuantFormat::Q4_K_M).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(300));

    let started = std::time::Instant::now();
    session.shutdown();
    assert!(
        started.elapsed() < std::time::Duration::from_secs(5),
        "shutdown took {:?}",
        started.elapsed()
    );
    assert!(!dir.path().join("model.Q4_K_M.gguf").exists());
    assert_eq!(probe.loads(), 0);
}

#[tokio::test]
#[serial_test::serial]
async fn relative_model_paths_are_loaded_by_absolute_path() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "model.Q4_K_M.gguf", 15);
    let (backend, probe) = FakeBackend::new("ok");
    let (mut session, mut events) = session(backend, missing_quantizer(dir.path()));

    let cwd = WorkingDir::enter(dir.path());
    let selected = session.select_path("model.Q4_K_M.gguf").unwrap();
    drop(cwd);
    assert!(selected.path.is_absolute(), "{}", selected.path.display());

    session.submit("hi").unwrap();
    settle(&mut session, &mut events).await;
    let loaded = probe.loaded_paths();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].is_absolute());
    assert!(loaded[0].is_file(), "{}", loaded[0].display());
}
