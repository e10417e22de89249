//! Page object for the file upload form

use std::path::{Path, PathBuf};

use crate::error::E2eResult;
use crate::page::Page;

pub const FILE_INPUT: &str = "#file-upload";
pub const UPLOAD_BUTTON: &str = "#file-submit";
pub const SUCCESS_HEADER: &str = "h3";
pub const UPLOADED_FILES: &str = "#uploaded-files";
/// The form has no dedicated validation element; errors render as the page heading
pub const VALIDATION_MESSAGE: &str = "h1";

pub struct UploadPage<'p> {
    page: &'p Page,
    url: String,
}

impl<'p> UploadPage<'p> {
    /// `ui_base` is the UI root; the form lives at `{ui_base}/upload`
    pub fn new(page: &'p Page, ui_base: &str) -> Self {
        Self {
            page,
            url: format!("{}/upload", ui_base.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn open(&self) -> E2eResult<()> {
        self.page.goto(&self.url).await
    }

    pub async fn select_file(&self, file: &Path) -> E2eResult<()> {
        self.page
            .set_input_files(FILE_INPUT, &[file.to_path_buf()])
            .await
    }

    pub async fn upload(&self) -> E2eResult<()> {
        self.page.click(UPLOAD_BUTTON).await
    }

    /// Simulate dropping a file on the drop area, falling back to the input
    pub async fn drag_and_drop_file(&self, file: &Path) -> E2eResult<()> {
        self.page.dispatch_event("body", "dragenter").await?;
        self.page.dispatch_event("body", "dragover").await?;
        self.page
            .set_input_files(FILE_INPUT, &[PathBuf::from(file)])
            .await?;
        self.upload().await
    }

    pub async fn assert_upload_success(&self, file_name: &str) -> E2eResult<()> {
        self.page.expect_text(SUCCESS_HEADER, "File Uploaded!").await?;
        self.page.expect_text(UPLOADED_FILES, file_name).await
    }

    pub async fn assert_validation_message(&self, message: &str) -> E2eResult<()> {
        self.page.expect_text(VALIDATION_MESSAGE, message).await
    }
}
