use llama_launcher::{model::MODEL_EXTENSIONS, LauncherError, ModelReference, QuantFormat};
use rfd::{
    AsyncFileDialog, AsyncMessageDialog, MessageButtons, MessageDialogResult, MessageLevel,
};

pub enum QuantizeAnswer {
    Quantize,
    AsIs,
    Cancel,
}

pub async fn pick_model() -> Option<std::path::PathBuf> {
    AsyncFileDialog::new()
        .set_title("Select a model")
        .add_filter("GGUF / GGML model", &MODEL_EXTENSIONS)
        .pick_file()
        .await
        .map(|file| file.path().to_path_buf())
}

pub async fn ask_quantize(model: &ModelReference, format: QuantFormat) -> QuantizeAnswer {
    let result = AsyncMessageDialog::new()
        .set_level(MessageLevel::Info)
        .set_title("Quantize model?")
        .set_description(format!(
            "{} holds FP16 weights.\n\n\
             Quantize it to {} before loading? The quantized copy is written next to \
             the original and reused next time.\n\n\
             Choose No to load the FP16 file as it is.",
            model.file_name(),
            format.label()
        ))
        .set_buttons(MessageButtons::YesNoCancel)
        .show()
        .await;
    match result {
        MessageDialogResult::Yes => QuantizeAnswer::Quantize,
        MessageDialogResult::No => QuantizeAnswer::AsIs,
        _ => QuantizeAnswer::Cancel,
    }
}

pub async fn show_error(error: &LauncherError) {
    AsyncMessageDialog::new()
        .set_level(MessageLevel::Error)
        .set_title(error.dialog_title())
        .set_description(error.to_string())
        .set_buttons(MessageButtons::Ok)
        .show()
        .await;
}
