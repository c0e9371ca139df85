use llama_launcher::*;

use crate::common::*;

#[test]
fn header_decides_over_the_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let fp16 = write_model(dir.path(), "mistral-7b.Q4_K_M.gguf", 1);
    let quantized = write_model(dir.path(), "mistral-7b.gguf", 15);

    assert_eq!(
        ModelReference::select(&fp16).unwrap().format,
        ModelFormat::RawFp16
    );
    assert_eq!(
        ModelReference::select(&quantized).unwrap().format,
        ModelFormat::Quantized
    );
}

#[test]
fn bf16_and_f32_count_as_unquantized() {
    let dir = tempfile::tempdir().unwrap();
    for (name, file_type) in [("a.gguf", 0), ("b.gguf", 32)] {
        let path = write_model(dir.path(), name, file_type);
        assert!(ModelReference::select(&path).unwrap().is_raw_fp16(), "{name}");
    }
}

#[test]
fn garbage_with_a_model_extension_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.gguf");
    std::fs::write(&path, "definitely not weights").unwrap();

    assert!(matches!(
        ModelReference::select(&path),
        Err(LauncherError::Load {
            reason: LoadFailure::InvalidContainer(_),
            ..
        })
    ));
}

#[test]
fn other_extensions_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.safetensors");
    std::fs::write(&path, gguf_bytes(1)).unwrap();

    let err = ModelReference::select(&path).unwrap_err();
    assert!(matches!(err, LauncherError::UnsupportedModelFile { .. }));
    assert_eq!(err.dialog_title(), "Model load error");
}

#[test]
fn derived_paths_sit_next_to_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("llama-3-8b-instruct-f16.gguf");
    assert_eq!(
        quantize::derive_output_path(&source, QuantFormat::Q3_K_S),
        dir.path().join("llama-3-8b-instruct.Q3_K_S.gguf")
    );
}

#[test]
#[serial_test::serial]
fn relative_selection_is_made_absolute() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "model.fp16.gguf", 1);
    let expected = std::fs::canonicalize(dir.path()).unwrap().join("model.fp16.gguf");

    let _cwd = WorkingDir::enter(dir.path());
    let selected = ModelReference::select("model.fp16.gguf").unwrap();
    assert_eq!(selected.path, expected);
    assert_eq!(selected.format, ModelFormat::RawFp16);
}

#[test]
fn split_files_derive_a_single_output() {
    let source = std::path::Path::new("/m/llama-7b-f16-00001-of-00002.gguf");
    assert_eq!(
        quantize::derive_output_path(source, QuantFormat::Q4_K_M),
        std::path::PathBuf::from("/m/llama-7b.Q4_K_M.gguf")
    );
}
