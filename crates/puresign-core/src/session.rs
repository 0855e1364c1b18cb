//! Shared ONNX Runtime session loading for the model adapters.

use ort::session::Session;
use std::path::Path;

/// Open an ONNX session if weights are configured and present on disk.
///
/// Returns `Ok(None)` when no path is configured or the file does not exist;
/// callers select their fallback mode in that case. A file that exists but
/// fails to load is an error.
pub(crate) fn open_optional(kind: &str, model_path: Option<&str>) -> Result<Option<Session>, ort::Error> {
    let Some(model_path) = model_path else {
        tracing::info!(model = kind, "no weights configured; using fallback");
        return Ok(None);
    };

    if !Path::new(model_path).exists() {
        tracing::warn!(model = kind, path = model_path, "weights not found; using fallback");
        return Ok(None);
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        model = kind,
        path = model_path,
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded model"
    );

    Ok(Some(session))
}
