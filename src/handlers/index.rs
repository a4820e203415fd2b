use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_files::{Files, NamedFile};
use actix_web::web;
use std::io::ErrorKind;
use std::path::Path;

/// GET /
///
/// Serves `<server.static_dir>/index.html` so a bundled build of the
/// recorder UI can be hosted by the same process.
pub async fn index(state: web::Data<AppState>) -> AppResult<NamedFile> {
    let path = Path::new(&state.get_config().server.static_dir).join("index.html");

    NamedFile::open_async(&path).await.map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            AppError::NotFound("index.html not found".to_string())
        } else {
            AppError::Internal(format!("failed to read {}: {}", path.display(), err))
        }
    })
}

/// `/static/*` mount for the assets `index.html` references.
pub fn static_files(static_dir: &str) -> Files {
    Files::new("/static", static_dir)
}
