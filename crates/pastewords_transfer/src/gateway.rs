use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use pastewords_contract::{Payload, TransferCode, TransferId};
use pastewords_storage::TransferStore;
use tracing::{info, warn};

use crate::{
    allocator::CodeAllocator,
    error::BrokerError,
    lifecycle::{bounded, TransferLifecycle},
    limits::BrokerLimits,
    words::WordPool,
};

const FALLBACK_FILE_NAME: &str = "file";

/// What the sender gets back from a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub code: TransferCode,
    pub transfer_id: TransferId,
    pub size_bytes: usize,
}

/// One sender's upload allowance: at most one successful send.
///
/// The claim is taken when a send starts and only kept if the send
/// succeeds, so a failed or cancelled send can be retried.
#[derive(Debug, Default)]
pub struct SenderSession {
    claimed: AtomicBool,
}

impl SenderSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a send on this session has succeeded or is in flight.
    pub fn is_spent(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

/// Holds a session claim; releases it on drop unless committed.
struct SessionClaim<'a> {
    session: &'a SenderSession,
    committed: bool,
}

impl<'a> SessionClaim<'a> {
    fn acquire(session: &'a SenderSession) -> Result<Self, BrokerError> {
        session
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| BrokerError::SessionSpent)?;
        Ok(Self {
            session,
            committed: false,
        })
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SessionClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.session.claimed.store(false, Ordering::SeqCst);
        }
    }
}

/// A file as handed over by the sender, before validation.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    fn into_payload(self) -> Result<Payload, BrokerError> {
        let content_type = normalize_content_type(&self.content_type)?;
        Ok(Payload {
            file_name: sanitize_file_name(&self.file_name),
            content_type,
            bytes: self.bytes,
        })
    }
}

fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        base.to_string()
    }
}

fn normalize_content_type(raw: &str) -> Result<String, BrokerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(mime::APPLICATION_OCTET_STREAM.to_string());
    }
    trimmed
        .parse::<mime::Mime>()
        .map(|parsed| parsed.to_string())
        .map_err(|_| BrokerError::InvalidContentType {
            content_type: trimmed.to_string(),
        })
}

/// `Send(file) -> code`.
#[derive(Clone)]
pub struct UploadGateway {
    allocator: CodeAllocator,
    lifecycle: TransferLifecycle,
    max_payload_bytes: usize,
}

impl UploadGateway {
    pub fn new(allocator: CodeAllocator, lifecycle: TransferLifecycle, limits: &BrokerLimits) -> Self {
        Self {
            allocator,
            lifecycle,
            max_payload_bytes: limits.max_payload_bytes,
        }
    }

    pub async fn send(
        &self,
        session: &SenderSession,
        upload: Upload,
    ) -> Result<Receipt, BrokerError> {
        let size = upload.bytes.len();
        if size > self.max_payload_bytes {
            return Err(BrokerError::TooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }
        let payload = upload.into_payload()?;
        let claim = SessionClaim::acquire(session)?;

        let reserved = self.allocator.allocate().await?;
        match self.lifecycle.attach_reserved(&reserved, payload).await {
            Ok(filled) => {
                claim.commit();
                Ok(Receipt {
                    code: filled.code,
                    transfer_id: filled.transfer_id,
                    size_bytes: size,
                })
            }
            Err(error) => {
                if let Err(cleanup) = self.lifecycle.abandon(&reserved).await {
                    warn!(
                        transfer_id = %reserved.transfer_id,
                        error = %cleanup,
                        "could not release reserved code"
                    );
                }
                Err(error)
            }
        }
    }
}

/// `Receive(code) -> file`, destroying the transfer.
#[derive(Clone)]
pub struct DownloadGateway {
    lifecycle: TransferLifecycle,
    max_code_len: usize,
}

impl DownloadGateway {
    pub fn new(lifecycle: TransferLifecycle, limits: &BrokerLimits) -> Self {
        Self {
            lifecycle,
            max_code_len: limits.max_code_len,
        }
    }

    pub async fn receive(&self, raw_code: &str) -> Result<Payload, BrokerError> {
        let code = TransferCode::parse(raw_code, self.max_code_len)?;
        self.lifecycle.resolve(&code).await
    }
}

/// Both gateways wired to one store and word pool.
#[derive(Clone)]
pub struct Broker {
    uploads: UploadGateway,
    downloads: DownloadGateway,
    store: Arc<dyn TransferStore>,
    limits: BrokerLimits,
}

impl Broker {
    pub fn new(store: Arc<dyn TransferStore>, pool: Arc<WordPool>, limits: BrokerLimits) -> Self {
        let lifecycle = TransferLifecycle::new(store.clone(), &limits);
        let allocator = CodeAllocator::new(pool, store.clone(), &limits);
        info!(
            max_payload_bytes = limits.max_payload_bytes,
            max_code_len = limits.max_code_len,
            allocation_attempts = limits.allocation_attempts,
            "transfer broker ready"
        );
        Self {
            uploads: UploadGateway::new(allocator, lifecycle.clone(), &limits),
            downloads: DownloadGateway::new(lifecycle, &limits),
            store,
            limits,
        }
    }

    pub async fn send(
        &self,
        session: &SenderSession,
        upload: Upload,
    ) -> Result<Receipt, BrokerError> {
        self.uploads.send(session, upload).await
    }

    pub async fn receive(&self, raw_code: &str) -> Result<Payload, BrokerError> {
        self.downloads.receive(raw_code).await
    }

    /// Readiness probe against the backing store.
    pub async fn ping(&self) -> Result<(), BrokerError> {
        bounded(self.limits.store_timeout, self.store.ping()).await
    }

    pub fn limits(&self) -> &BrokerLimits {
        &self.limits
    }
}
