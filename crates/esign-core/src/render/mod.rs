//! Original and signed contract renditions.

mod pdf;
mod raster;
mod template;

use crate::artifacts::{content_hash, ArtifactStore};
use crate::clock::Clock;
use crate::directory::ContractDirectory;
use crate::error::RenderError;
use crate::image::SignatureImage;
use crate::types::{ContractId, ContractSnapshot, DocumentArtifact, SigningSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// A rendition durably written to the artifact store.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub artifact: DocumentArtifact,
    pub generated_at: DateTime<Utc>,
    pub owner_user_id: String,
    pub connection_id: Option<String>,
}

/// Produces contract renditions. An `Err` never leaves an artifact behind.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_original(&self, contract_id: &ContractId)
        -> Result<RenderedDocument, RenderError>;

    async fn render_signed(
        &self,
        session: &SigningSession,
        signature: &SignatureImage,
        signed_at: DateTime<Utc>,
    ) -> Result<RenderedDocument, RenderError>;
}

/// Renders PDFs from contract data in the directory and writes them to an artifact store.
pub struct PdfDocumentRenderer {
    directory: Arc<dyn ContractDirectory>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    span: tracing::Span,
}

impl PdfDocumentRenderer {
    pub fn new(
        directory: Arc<dyn ContractDirectory>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        span: tracing::Span,
    ) -> Self {
        Self {
            directory,
            artifacts,
            clock,
            timeout,
            span,
        }
    }

    async fn snapshot(&self, contract_id: &ContractId) -> Result<ContractSnapshot, RenderError> {
        let snapshot = self
            .directory
            .contract_snapshot(contract_id)
            .await?
            .ok_or_else(|| RenderError::ContractNotFound(contract_id.to_string()))?;
        template::validate(&snapshot)?;
        Ok(snapshot)
    }

    /// Runs CPU-bound composition off the async workers, bounded by the render timeout.
    async fn compose<F>(&self, job: F) -> Result<Vec<u8>, RenderError>
    where
        F: FnOnce() -> Result<Vec<u8>, RenderError> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(job);
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RenderError::Encode(format!(
                "render task failed: {join_err}"
            ))),
            Err(_) => Err(RenderError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn persist(
        &self,
        key: String,
        bytes: &[u8],
        generated_at: DateTime<Utc>,
        snapshot: &ContractSnapshot,
    ) -> Result<RenderedDocument, RenderError> {
        let hash = content_hash(bytes);
        self.artifacts.put(&key, bytes).await?;
        tracing::info!(
            path = %key,
            hash = %hash,
            size = bytes.len(),
            "document written"
        );
        Ok(RenderedDocument {
            artifact: DocumentArtifact { path: key, hash },
            generated_at,
            owner_user_id: snapshot.owner_user_id.clone(),
            connection_id: snapshot.connection_id.clone(),
        })
    }
}

#[async_trait]
impl DocumentRenderer for PdfDocumentRenderer {
    async fn render_original(
        &self,
        contract_id: &ContractId,
    ) -> Result<RenderedDocument, RenderError> {
        let span = tracing::info_span!(parent: &self.span, "render_original", contract_id = %contract_id);
        async {
            let snapshot = self.snapshot(contract_id).await?;
            let generated_at = self.clock.now();
            let document = template::original_document(&snapshot, generated_at);
            let bytes = self.compose(move || pdf::compose(&document, None)).await?;

            let key = format!(
                "contracts/{}/original-{}-{}.pdf",
                path_segment(contract_id.as_str()),
                generated_at.format("%Y%m%dT%H%M%S"),
                short_nonce()
            );
            self.persist(key, &bytes, generated_at, &snapshot).await
        }
        .instrument(span)
        .await
    }

    async fn render_signed(
        &self,
        session: &SigningSession,
        signature: &SignatureImage,
        signed_at: DateTime<Utc>,
    ) -> Result<RenderedDocument, RenderError> {
        let span = tracing::info_span!(
            parent: &self.span,
            "render_signed",
            session_id = %session.id,
            contract_id = %session.contract_id
        );
        async {
            let snapshot = self.snapshot(&session.contract_id).await?;
            let generated_at = self.clock.now();
            let document = template::signed_document(&snapshot, session, signed_at, generated_at);
            let signature = signature.clone();
            let bytes = self
                .compose(move || {
                    let image = raster::prepare(&signature)?;
                    pdf::compose(&document, Some(&image))
                })
                .await?;

            let key = format!("sessions/{}/signed-{}.pdf", session.id, short_nonce());
            self.persist(key, &bytes, generated_at, &snapshot).await
        }
        .instrument(span)
        .await
    }
}

/// Keeps contract ids usable as a single path component.
fn path_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn short_nonce() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifacts::FileArtifactStore;
    use crate::clock::ManualClock;
    use crate::error::DirectoryError;
    use crate::image::tests::rgba_png;
    use crate::store::memory::tests::session_for;
    use std::collections::HashMap;

    pub(crate) use super::template::tests::snapshot;

    #[derive(Default)]
    pub(crate) struct StaticDirectory {
        pub contracts: HashMap<ContractId, ContractSnapshot>,
    }

    impl StaticDirectory {
        pub(crate) fn with(contracts: &[&str]) -> Self {
            Self {
                contracts: contracts
                    .iter()
                    .map(|id| (ContractId::new(*id), snapshot(id)))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ContractDirectory for StaticDirectory {
        async fn contract_snapshot(
            &self,
            contract_id: &ContractId,
        ) -> Result<Option<ContractSnapshot>, DirectoryError> {
            Ok(self.contracts.get(contract_id).cloned())
        }
    }

    fn renderer(dir: &std::path::Path, directory: StaticDirectory) -> PdfDocumentRenderer {
        renderer_with_timeout(dir, directory, Duration::from_secs(30))
    }

    fn renderer_with_timeout(
        dir: &std::path::Path,
        directory: StaticDirectory,
        timeout: Duration,
    ) -> PdfDocumentRenderer {
        PdfDocumentRenderer::new(
            Arc::new(directory),
            Arc::new(FileArtifactStore::new(dir)),
            Arc::new(ManualClock::new(Utc::now())),
            timeout,
            tracing::Span::none(),
        )
    }

    #[tokio::test]
    async fn original_hash_matches_written_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path(), StaticDirectory::with(&["C1"]));

        let rendered = renderer.render_original(&ContractId::new("C1")).await.unwrap();
        assert!(rendered.artifact.path.starts_with("contracts/C1/original-"));
        assert_eq!(rendered.owner_user_id, "user-7");

        let bytes = std::fs::read(dir.path().join(&rendered.artifact.path)).unwrap();
        assert_eq!(content_hash(&bytes), rendered.artifact.hash);
    }

    #[tokio::test]
    async fn unknown_contract_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path(), StaticDirectory::default());

        let err = renderer
            .render_original(&ContractId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::ContractNotFound(ref id) if id == "missing"));
        assert!(!dir.path().join("contracts").exists());
    }

    #[tokio::test]
    async fn incomplete_contract_data_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = StaticDirectory::with(&["C1"]);
        if let Some(s) = directory.contracts.get_mut(&ContractId::new("C1")) {
            s.customer.document_number.clear();
        }
        let renderer = renderer(dir.path(), directory);
        let err = renderer
            .render_original(&ContractId::new("C1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingData(_)));
    }

    #[tokio::test]
    async fn signed_rendition_embeds_signature_and_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path(), StaticDirectory::with(&["C1"]));

        let mut session = session_for("C1", Utc::now());
        session.signer_ip = Some("203.0.113.9".to_string());
        let image = SignatureImage::from_bytes(rgba_png(4, 4)).unwrap();

        let rendered = renderer
            .render_signed(&session, &image, Utc::now())
            .await
            .unwrap();
        assert!(rendered
            .artifact
            .path
            .starts_with(&format!("sessions/{}/signed-", session.id)));

        let bytes = std::fs::read(dir.path().join(&rendered.artifact.path)).unwrap();
        assert_eq!(content_hash(&bytes), rendered.artifact.hash);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/Sig"));
        assert!(text.contains("/SMask") || text.contains("/FlateDecode"));
        assert!(text.contains("203.0.113.9"));
        assert!(text.contains(&session.original.hash));
    }

    #[tokio::test]
    async fn signed_render_times_out_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let renderer =
            renderer_with_timeout(dir.path(), StaticDirectory::with(&["C1"]), Duration::ZERO);
        let session = session_for("C1", Utc::now());
        let image = SignatureImage::from_bytes(rgba_png(4, 4)).unwrap();

        let err = renderer
            .render_signed(&session, &image, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Timeout(0)));
        assert!(!dir.path().join("sessions").exists());
    }

    #[tokio::test]
    async fn image_that_overflows_its_header_fails_inside_the_render_job() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path(), StaticDirectory::with(&["C1"]));
        let session = session_for("C1", Utc::now());
        let png = crate::image::tests::png_from_raw(8, 8, 0, &vec![0u8; 1 << 20]);
        let image = SignatureImage::from_bytes(png).unwrap();

        let err = renderer
            .render_signed(&session, &image, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Raster(_)));
        assert!(!dir.path().join("sessions").exists());
    }

    #[test]
    fn path_segment_replaces_separators() {
        assert_eq!(path_segment("C-1/../x"), "C-1____x");
    }
}
