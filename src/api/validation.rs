use std::path::Path;

use axum::extract::Multipart;

use crate::api::errors::ApiError;

#[derive(Debug)]
pub(crate) struct UploadedFile {
    pub(crate) filename: Option<String>,
    pub(crate) bytes: Vec<u8>,
}

fn extension_of(filename: &str) -> Result<String, ApiError> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(|| ApiError::BadRequest(format!("File '{filename}' must have an extension")))
}

pub(crate) fn validate_scan_upload(
    filename: Option<&str>,
    allowed_extensions: &[String],
) -> Result<(), ApiError> {
    let filename = filename
        .ok_or_else(|| ApiError::BadRequest("Scan upload must have a filename".to_string()))?;
    let extension = extension_of(filename)?;
    if !allowed_extensions.iter().any(|allowed| allowed == &extension) {
        return Err(ApiError::BadRequest(format!("File extension '{extension}' is not allowed")));
    }
    Ok(())
}

pub(crate) fn validate_spreadsheet_upload(filename: Option<&str>) -> Result<(), ApiError> {
    let Some(filename) = filename else {
        return Ok(());
    };
    match extension_of(filename)?.as_str() {
        "csv" | "tsv" | "txt" | "xlsx" | "xlsm" | "xls" | "ods" => Ok(()),
        other => Err(ApiError::BadRequest(format!(
            "Spreadsheets must be uploaded as CSV or Excel, got '.{other}'"
        ))),
    }
}

/// Collects every `file` part, enforcing the per-file size and the file count.
pub(crate) async fn read_file_parts(
    multipart: &mut Multipart,
    max_bytes: usize,
    max_files: usize,
) -> Result<Vec<UploadedFile>, ApiError> {
    let mut files = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if files.len() >= max_files {
            return Err(ApiError::BadRequest(format!(
                "At most {max_files} files can be uploaded at once"
            )));
        }

        let filename = field.file_name().map(|name| name.to_string());
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
        {
            let next_size = bytes.len() + chunk.len();
            if next_size > max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "File size exceeds {}MB limit",
                    max_bytes / (1024 * 1024)
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        files.push(UploadedFile { filename, bytes });
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("No file part in the upload".to_string()));
    }
    Ok(files)
}
