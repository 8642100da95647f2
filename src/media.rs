//! Files attached to educational cards.
//!
//! Bytes are written under the media directory with a random name; the
//! database only keeps the metadata and the card's list of media ids.

#[cfg(feature = "web")]
use crate::api::{AdminUser, ApiError, ApiResult, AuthUser, ok};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::error::{ServiceError, ServiceResult};
use crate::lessons::ensure_visible;
use crate::models::{CardContent, Id, MediaFile, Role};
use crate::store::Store;
#[cfg(feature = "web")]
use axum::extract::{Multipart, Path, State};
#[cfg(feature = "web")]
use axum::http::header;
#[cfg(feature = "web")]
use axum::response::{IntoResponse, Response};
use std::fs;
use std::path::Path as FsPath;
use uuid::Uuid;

/// Largest accepted upload
pub const MAX_MEDIA_BYTES: usize = 10 * 1024 * 1024;

fn clean_file_name(name: &str) -> ServiceResult<String> {
    // Keep only the last path component a browser might send.
    let name = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(ServiceError::validation("file name cannot be empty"));
    }
    Ok(name.chars().take(255).collect())
}

/// Store an uploaded file and attach it to an educational card
///
/// # Arguments
/// * `store` - Database handle
/// * `media_dir` - Directory the bytes are written to
/// * `card_id` - Educational card receiving the file
/// * `file_name` - Original name, as sent by the client
/// * `content_type` - MIME type, as sent by the client
/// * `bytes` - File content
///
/// # Errors
/// * `TooLarge` above `MAX_MEDIA_BYTES`
/// * `Validation` for empty files or non-educational cards
pub fn store_media(
    store: &Store,
    media_dir: &FsPath,
    card_id: Id,
    file_name: &str,
    content_type: &str,
    bytes: &[u8],
) -> ServiceResult<MediaFile> {
    if bytes.len() > MAX_MEDIA_BYTES {
        return Err(ServiceError::TooLarge);
    }
    if bytes.is_empty() {
        return Err(ServiceError::validation("file is empty"));
    }
    let file_name = clean_file_name(file_name)?;
    let content_type = match content_type.trim() {
        "" => "application/octet-stream".to_string(),
        ct => ct.to_string(),
    };

    store.read(|db| match db.card(card_id)?.content {
        CardContent::Educational { .. } => Ok(()),
        _ => Err(ServiceError::validation(
            "media can only be attached to educational cards",
        )),
    })?;

    fs::create_dir_all(media_dir)?;
    let stored_as = Uuid::new_v4().to_string();
    let path = media_dir.join(&stored_as);
    fs::write(&path, bytes)?;

    let result = store.write(|db| {
        let id = db.next_id();
        let card = db
            .cards
            .get_mut(&card_id)
            .ok_or(ServiceError::NotFound("card"))?;
        let CardContent::Educational { media, .. } = &mut card.content else {
            return Err(ServiceError::validation(
                "media can only be attached to educational cards",
            ));
        };
        media.push(id);

        let file = MediaFile {
            id,
            card_id,
            file_name: file_name.clone(),
            content_type: content_type.clone(),
            size: bytes.len() as u64,
            stored_as: stored_as.clone(),
        };
        db.media.insert(id, file.clone());
        Ok(file)
    });

    match result {
        Ok(file) => {
            log::info!(
                "stored media {} '{}' ({} bytes) on card {}",
                file.id,
                file.file_name,
                file.size,
                card_id
            );
            Ok(file)
        }
        Err(e) => {
            // The card changed in between; drop the orphaned bytes.
            let _ = fs::remove_file(&path);
            Err(e)
        }
    }
}

/// Metadata and bytes of a stored file
pub fn load_media(
    store: &Store,
    media_dir: &FsPath,
    id: Id,
    role: Role,
) -> ServiceResult<(MediaFile, Vec<u8>)> {
    let (file, lesson_id) = store.read(|db| {
        let file = db.media.get(&id).ok_or(ServiceError::NotFound("media"))?;
        let lesson_id = db.card(file.card_id)?.lesson_id;
        Ok::<_, ServiceError>((file.clone(), lesson_id))
    })?;
    ensure_visible(store, lesson_id, role)?;

    let bytes = fs::read(media_dir.join(&file.stored_as)).map_err(|e| {
        log::warn!("media {} is missing its bytes: {}", id, e);
        ServiceError::NotFound("media")
    })?;
    Ok((file, bytes))
}

/// Delete a stored file and detach it from its card
pub fn delete_media(store: &Store, media_dir: &FsPath, id: Id) -> ServiceResult<()> {
    let file = store.write(|db| {
        let file = db.media.remove(&id).ok_or(ServiceError::NotFound("media"))?;
        if let Some(card) = db.cards.get_mut(&file.card_id) {
            if let CardContent::Educational { media, .. } = &mut card.content {
                media.retain(|m| *m != id);
            }
        }
        Ok(file)
    })?;

    remove_files(media_dir, std::slice::from_ref(&file));
    log::info!("deleted media {}", id);
    Ok(())
}

/// Delete the stored bytes of media records already removed from the database
///
/// Failures are logged; the records are gone either way.
pub fn remove_files(media_dir: &FsPath, files: &[MediaFile]) {
    for file in files {
        let path = media_dir.join(&file.stored_as);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

// Web handler functions below (only compiled with "web" feature)

/// Handle a multipart upload; the file travels in the `file` field
#[cfg(feature = "web")]
pub async fn handle_upload(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(card_id): Path<Id>,
    mut multipart: Multipart,
) -> ApiResult<MediaFile> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;

        return ok(store_media(
            &state.store,
            &state.config.media_dir(),
            card_id,
            &file_name,
            &content_type,
            &bytes,
        )?);
    }

    Err(ServiceError::validation("multipart field 'file' is missing").into())
}

#[cfg(feature = "web")]
pub async fn handle_download(
    State(state): State<SharedState>,
    caller: AuthUser,
    Path(id): Path<Id>,
) -> Result<Response, ApiError> {
    let (file, bytes) = load_media(&state.store, &state.config.media_dir(), id, caller.user.role)?;
    let disposition = format!("inline; filename=\"{}\"", file.file_name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(feature = "web")]
pub async fn handle_delete(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<bool> {
    delete_media(&state.store, &state.config.media_dir(), id)?;
    ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_lose_their_directories() {
        assert_eq!(clean_file_name("C:\\photos\\cat.png").unwrap(), "cat.png");
        assert_eq!(clean_file_name("../../etc/passwd").unwrap(), "passwd");
        assert!(clean_file_name("uploads/").is_err());
        assert!(clean_file_name("..").is_err());
    }
}
