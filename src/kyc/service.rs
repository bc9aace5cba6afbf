//! KYC verification workflow
//!
//! Document lifecycle: pending -> under_review -> verified | rejected, with
//! rejected documents re-edited in place on resubmission. Expiry is applied
//! lazily whenever a reviewer reads a document.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::{CryptoError, FieldCipher};
use crate::gateway::{notify_best_effort, DocumentStorage, GatewayError, NotificationSender};
use crate::models::{AccountStatus, Identity, KycStatus, UserRole, VerificationUpdate};
use crate::store::{IdentityStore, KycStore, StoreError};

use super::model::{
    DocumentDetails, ImageSide, KycDocument, PriorSubmission, StoredImage, SubmitDocumentRequest,
    VerificationChecks, VerificationStatus,
};

/// Largest accepted image after base64 decoding
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// KYC errors
#[derive(Error, Debug)]
pub enum KycError {
    #[error("Document not found")]
    DocumentNotFound,

    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Cannot {action} a document that is {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("Reviewer must be an admin")]
    NotReviewer,

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Document storage error: {0}")]
    Storage(#[from] GatewayError),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// KYC verification service
pub struct VerificationService {
    identities: Arc<dyn IdentityStore>,
    documents: Arc<dyn KycStore>,
    storage: Arc<dyn DocumentStorage>,
    notifier: Arc<dyn NotificationSender>,
    cipher: FieldCipher,
    io_timeout: Duration,
}

impl VerificationService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        documents: Arc<dyn KycStore>,
        storage: Arc<dyn DocumentStorage>,
        notifier: Arc<dyn NotificationSender>,
        cipher: FieldCipher,
        io_timeout: Duration,
    ) -> Self {
        Self {
            identities,
            documents,
            storage,
            notifier,
            cipher,
            io_timeout,
        }
    }

    /// Whether the identity may take part in money-moving operations
    pub async fn can_transact(&self, identity_id: Uuid) -> Result<bool, KycError> {
        Ok(self.load_identity(identity_id).await?.can_transact())
    }

    /// Upload a document for the caller's own identity.
    ///
    /// A rejected document is re-edited in place. A verified or expired one
    /// is superseded by a new document. A document already awaiting review
    /// blocks the upload.
    pub async fn submit(
        &self,
        identity_id: Uuid,
        request: SubmitDocumentRequest,
    ) -> Result<KycDocument, KycError> {
        let identity = self.load_identity(identity_id).await?;
        let latest = self.documents.find_latest_for_identity(identity_id).await?;

        if let Some(doc) = &latest {
            if matches!(
                doc.status,
                VerificationStatus::Pending | VerificationStatus::UnderReview
            ) {
                return Err(KycError::InvalidTransition {
                    from: doc.status.as_str(),
                    action: "resubmit",
                });
            }
        }

        let front_image = self.store_image(&request.front_image).await?;
        let back_image = match request.back_image.as_deref() {
            Some(encoded) => Some(self.store_image(encoded).await?),
            None => None,
        };
        let now = Utc::now();
        let owner = VerificationUpdate {
            kyc_status: KycStatus::Submitted,
            status: identity.status,
            kyc_rejection_reason: None,
        };

        let document = match latest {
            Some(mut doc) if doc.status == VerificationStatus::Rejected => {
                doc.document_type = request.document_type;
                doc.front_image = front_image;
                doc.back_image = back_image;
                apply_details(&mut doc, request.details);
                doc.status = VerificationStatus::Pending;
                doc.reviewed_by = None;
                doc.reviewed_at = None;
                doc.rejection_reason = None;
                doc.checks = VerificationChecks::default();
                doc.submitted_at = now;
                doc.updated_at = now;
                self.commit(&doc, VerificationStatus::Rejected, Some(&owner), "resubmit")
                    .await?;
                doc
            }
            _ => {
                let mut doc = KycDocument {
                    id: Uuid::new_v4(),
                    identity_id,
                    document_type: request.document_type,
                    front_image,
                    back_image,
                    document_number: None,
                    full_name: None,
                    date_of_birth: None,
                    expiry_date: None,
                    status: VerificationStatus::Pending,
                    reviewed_by: None,
                    reviewed_at: None,
                    rejection_reason: None,
                    admin_notes: None,
                    checks: VerificationChecks::default(),
                    submission_count: 1,
                    previous_submissions: Vec::new(),
                    submitted_at: now,
                    updated_at: now,
                };
                apply_details(&mut doc, request.details);
                self.documents.insert(&doc, Some(&owner)).await?;
                doc
            }
        };

        tracing::info!(
            identity_id = %identity_id,
            document_id = %document.id,
            submission = document.submission_count,
            "KYC document submitted"
        );
        Ok(document)
    }

    /// The caller's most recent document
    pub async fn my_document(&self, identity_id: Uuid) -> Result<KycDocument, KycError> {
        self.documents
            .find_latest_for_identity(identity_id)
            .await?
            .ok_or(KycError::DocumentNotFound)
    }

    /// Size of the review queue
    pub async fn pending_count(&self, reviewer_id: Uuid) -> Result<i64, KycError> {
        self.require_reviewer(reviewer_id).await?;
        Ok(self.documents.count_pending().await?)
    }

    pub async fn get_for_review(
        &self,
        reviewer_id: Uuid,
        document_id: Uuid,
    ) -> Result<KycDocument, KycError> {
        self.require_reviewer(reviewer_id).await?;
        self.load_for_review(document_id).await
    }

    /// Decrypt a stored image reference and fetch the image
    pub async fn document_image(
        &self,
        reviewer_id: Uuid,
        document_id: Uuid,
        side: ImageSide,
    ) -> Result<Vec<u8>, KycError> {
        let doc = self.get_for_review(reviewer_id, document_id).await?;
        let image = match side {
            ImageSide::Front => Some(&doc.front_image),
            ImageSide::Back => doc.back_image.as_ref(),
        }
        .ok_or(KycError::DocumentNotFound)?;
        let reference = self.cipher.decrypt(&image.sealed_reference)?;
        let bytes = tokio::time::timeout(self.io_timeout, self.storage.retrieve(&reference))
            .await
            .map_err(|_| GatewayError::Timeout)??;
        Ok(bytes)
    }

    /// pending -> under_review
    pub async fn start_review(
        &self,
        reviewer_id: Uuid,
        document_id: Uuid,
    ) -> Result<KycDocument, KycError> {
        self.require_reviewer(reviewer_id).await?;
        let mut doc = self.load_for_review(document_id).await?;
        match doc.status {
            VerificationStatus::Pending => {
                doc.status = VerificationStatus::UnderReview;
                doc.reviewed_by = Some(reviewer_id);
                doc.updated_at = Utc::now();
                self.commit(&doc, VerificationStatus::Pending, None, "review")
                    .await?;
                tracing::info!(document_id = %doc.id, reviewer_id = %reviewer_id, "KYC review started");
                Ok(doc)
            }
            VerificationStatus::UnderReview => Ok(doc),
            other => Err(KycError::InvalidTransition {
                from: other.as_str(),
                action: "review",
            }),
        }
    }

    /// Store the reviewer's checklist
    pub async fn record_checks(
        &self,
        reviewer_id: Uuid,
        document_id: Uuid,
        checks: VerificationChecks,
    ) -> Result<KycDocument, KycError> {
        self.require_reviewer(reviewer_id).await?;
        let mut doc = self.load_for_review(document_id).await?;
        if !doc.status.is_reviewable() {
            return Err(KycError::InvalidTransition {
                from: doc.status.as_str(),
                action: "record checks on",
            });
        }
        let expected = doc.status;
        doc.checks = checks;
        doc.updated_at = Utc::now();
        self.commit(&doc, expected, None, "record checks on").await?;
        Ok(doc)
    }

    /// Approve a document; the owner becomes kyc_verified and, if still
    /// pending verification, active.
    pub async fn verify(
        &self,
        reviewer_id: Uuid,
        document_id: Uuid,
        notes: Option<String>,
    ) -> Result<KycDocument, KycError> {
        self.require_reviewer(reviewer_id).await?;
        let mut doc = self.load_for_review(document_id).await?;
        if !doc.status.is_reviewable() {
            return Err(KycError::InvalidTransition {
                from: doc.status.as_str(),
                action: "verify",
            });
        }

        let owner = self.load_identity(doc.identity_id).await?;
        let update = VerificationUpdate {
            kyc_status: KycStatus::KycVerified,
            status: match owner.status {
                AccountStatus::PendingVerification => AccountStatus::Active,
                other => other,
            },
            kyc_rejection_reason: None,
        };

        let expected = doc.status;
        let now = Utc::now();
        doc.status = VerificationStatus::Verified;
        doc.reviewed_by = Some(reviewer_id);
        doc.reviewed_at = Some(now);
        doc.rejection_reason = None;
        if notes.is_some() {
            doc.admin_notes = notes;
        }
        doc.updated_at = now;
        self.commit(&doc, expected, Some(&update), "verify").await?;

        tracing::info!(document_id = %doc.id, identity_id = %owner.id, reviewer_id = %reviewer_id, "KYC verified");
        self.notify(
            &owner,
            "AgriConnect: Your identity verification is complete. You can now buy and sell on AgriConnect."
                .to_string(),
        );
        Ok(doc)
    }

    /// Reject a document; the submission moves to history and the owner
    /// becomes rejected with the reason.
    pub async fn reject(
        &self,
        reviewer_id: Uuid,
        document_id: Uuid,
        reason: String,
        notes: Option<String>,
    ) -> Result<KycDocument, KycError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(KycError::InvalidDocument(
                "a rejection reason is required".to_string(),
            ));
        }
        self.require_reviewer(reviewer_id).await?;
        let mut doc = self.load_for_review(document_id).await?;
        if !doc.status.is_reviewable() {
            return Err(KycError::InvalidTransition {
                from: doc.status.as_str(),
                action: "reject",
            });
        }

        let owner = self.load_identity(doc.identity_id).await?;
        let update = VerificationUpdate {
            kyc_status: KycStatus::Rejected,
            status: owner.status,
            kyc_rejection_reason: Some(reason.clone()),
        };

        let expected = doc.status;
        let now = Utc::now();
        doc.previous_submissions.push(PriorSubmission {
            submitted_at: doc.submitted_at,
            rejected_at: now,
            rejection_reason: reason.clone(),
        });
        doc.submission_count += 1;
        doc.status = VerificationStatus::Rejected;
        doc.reviewed_by = Some(reviewer_id);
        doc.reviewed_at = Some(now);
        doc.rejection_reason = Some(reason.clone());
        if notes.is_some() {
            doc.admin_notes = notes;
        }
        doc.updated_at = now;
        self.commit(&doc, expected, Some(&update), "reject").await?;

        tracing::info!(document_id = %doc.id, identity_id = %owner.id, reviewer_id = %reviewer_id, %reason, "KYC rejected");
        self.notify(
            &owner,
            format!(
                "AgriConnect: Your identity verification was not approved. Reason: {}. Please resubmit your documents.",
                reason
            ),
        );
        Ok(doc)
    }

    async fn load_identity(&self, identity_id: Uuid) -> Result<Identity, KycError> {
        self.identities
            .find_by_id(identity_id)
            .await?
            .ok_or(KycError::IdentityNotFound)
    }

    async fn require_reviewer(&self, reviewer_id: Uuid) -> Result<Identity, KycError> {
        let reviewer = self
            .identities
            .find_by_id(reviewer_id)
            .await?
            .ok_or(KycError::NotReviewer)?;
        if reviewer.role != UserRole::Admin
            || matches!(reviewer.status, AccountStatus::Suspended | AccountStatus::Banned)
        {
            return Err(KycError::NotReviewer);
        }
        Ok(reviewer)
    }

    /// Load a document, marking it expired first if its expiry date passed
    async fn load_for_review(&self, document_id: Uuid) -> Result<KycDocument, KycError> {
        let mut doc = self
            .documents
            .find(document_id)
            .await?
            .ok_or(KycError::DocumentNotFound)?;

        if doc.status == VerificationStatus::Expired || !doc.is_expired_on(Utc::now().date_naive()) {
            return Ok(doc);
        }

        // Expiring a verified document withdraws the owner's verification
        let lapsed = if doc.status == VerificationStatus::Verified {
            let owner = self.load_identity(doc.identity_id).await?;
            (owner.kyc_status == KycStatus::KycVerified).then(|| VerificationUpdate {
                kyc_status: KycStatus::Pending,
                status: owner.status,
                kyc_rejection_reason: None,
            })
        } else {
            None
        };

        let expected = doc.status;
        doc.status = VerificationStatus::Expired;
        doc.updated_at = Utc::now();
        match self.documents.update(&doc, expected, lapsed.as_ref()).await {
            Ok(()) => {}
            Err(StoreError::VersionConflict) => {
                // A concurrent review moved it; show the reviewer that state
                return self
                    .documents
                    .find(document_id)
                    .await?
                    .ok_or(KycError::DocumentNotFound);
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(document_id = %doc.id, "KYC document expired");
        if lapsed.is_some() {
            tracing::info!(identity_id = %doc.identity_id, "KYC verification lapsed with document expiry");
        }
        Ok(doc)
    }

    /// Write `doc` over a stored copy still in `expected`, together with
    /// the owner's new verification fields
    async fn commit(
        &self,
        doc: &KycDocument,
        expected: VerificationStatus,
        owner: Option<&VerificationUpdate>,
        action: &'static str,
    ) -> Result<(), KycError> {
        match self.documents.update(doc, expected, owner).await {
            Ok(()) => Ok(()),
            Err(StoreError::VersionConflict) => {
                let current = self
                    .documents
                    .find(doc.id)
                    .await?
                    .ok_or(KycError::DocumentNotFound)?;
                tracing::warn!(document_id = %doc.id, status = current.status.as_str(), action, "KYC document changed under review");
                Err(KycError::InvalidTransition {
                    from: current.status.as_str(),
                    action,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store_image(&self, encoded: &str) -> Result<StoredImage, KycError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| KycError::InvalidDocument("image is not valid base64".to_string()))?;
        if bytes.is_empty() {
            return Err(KycError::InvalidDocument("image is empty".to_string()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(KycError::InvalidDocument(format!(
                "image exceeds {} bytes",
                MAX_IMAGE_BYTES
            )));
        }

        let reference = tokio::time::timeout(self.io_timeout, self.storage.store(bytes))
            .await
            .map_err(|_| GatewayError::Timeout)??;
        Ok(StoredImage {
            sealed_reference: self.cipher.encrypt(&reference)?,
            uploaded_at: Utc::now(),
        })
    }

    fn notify(&self, identity: &Identity, message: String) {
        notify_best_effort(
            self.notifier.clone(),
            identity.phone.clone(),
            message,
            self.io_timeout,
        );
    }
}

fn apply_details(doc: &mut KycDocument, details: DocumentDetails) {
    doc.document_number = details.document_number.map(|s| s.trim().to_string());
    doc.full_name = details.full_name.map(|s| s.trim().to_string());
    doc.date_of_birth = details.date_of_birth;
    doc.expiry_date = details.expiry_date;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{InMemoryDocumentStorage, LogNotificationSender};
    use crate::kyc::DocumentType;
    use crate::models::Profile;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    struct Fixture {
        service: VerificationService,
        store: Arc<MemoryStore>,
        admin: Uuid,
        farmer: Uuid,
    }

    async fn add_identity(store: &MemoryStore, cipher: &FieldCipher, phone: &str, role: UserRole) -> Uuid {
        let mut identity =
            Identity::register(phone, &format!("{}@x.co", phone), phone, role, cipher).unwrap();
        if role == UserRole::Admin {
            identity.status = AccountStatus::Active;
        }
        let profile = Profile {
            id: Uuid::new_v4(),
            identity_id: identity.id,
            full_names: "Test".to_string(),
            longitude: None,
            latitude: None,
            address: None,
            farm_name: None,
            business_name: None,
            vehicle_type: None,
            created_at: Utc::now(),
        };
        store.create_with_profile(&identity, &profile).await.unwrap();
        identity.id
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cipher = FieldCipher::from_hex_key(&"44".repeat(32)).unwrap();
        let admin = add_identity(&store, &cipher, "254700000001", UserRole::Admin).await;
        let farmer = add_identity(&store, &cipher, "254712345678", UserRole::Farmer).await;
        let service = VerificationService::new(
            store.clone(),
            store.clone(),
            Arc::new(InMemoryDocumentStorage::new()),
            Arc::new(LogNotificationSender),
            cipher,
            Duration::from_secs(5),
        );
        Fixture {
            service,
            store,
            admin,
            farmer,
        }
    }

    fn upload(expiry: Option<NaiveDate>) -> SubmitDocumentRequest {
        SubmitDocumentRequest {
            document_type: DocumentType::NationalId,
            front_image: base64::engine::general_purpose::STANDARD.encode(b"front"),
            back_image: Some(base64::engine::general_purpose::STANDARD.encode(b"back")),
            details: DocumentDetails {
                document_number: Some("12345678".to_string()),
                full_name: Some("Jane Wanjiku".to_string()),
                date_of_birth: None,
                expiry_date: expiry,
            },
        }
    }

    async fn identity(f: &Fixture, id: Uuid) -> Identity {
        f.store.find_by_id(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_submit_marks_identity_submitted_and_seals_reference() {
        let f = fixture().await;
        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();

        assert_eq!(doc.status, VerificationStatus::Pending);
        assert!(doc.front_image.sealed_reference.contains(':'));
        assert!(!doc.front_image.sealed_reference.starts_with("kyc/"));
        assert_eq!(identity(&f, f.farmer).await.kyc_status, KycStatus::Submitted);

        let image = f
            .service
            .document_image(f.admin, doc.id, ImageSide::Back)
            .await
            .unwrap();
        assert_eq!(image, b"back");
    }

    #[tokio::test]
    async fn test_verify_then_reject_flow_drives_can_transact() {
        let f = fixture().await;
        assert!(!f.service.can_transact(f.farmer).await.unwrap());

        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();
        f.service.start_review(f.admin, doc.id).await.unwrap();
        f.service.verify(f.admin, doc.id, Some("ok".to_string())).await.unwrap();

        let owner = identity(&f, f.farmer).await;
        assert_eq!(owner.kyc_status, KycStatus::KycVerified);
        assert_eq!(owner.status, AccountStatus::Active);
        assert!(f.service.can_transact(f.farmer).await.unwrap());

        // A replacement document goes back through review
        let replacement = f.service.submit(f.farmer, upload(None)).await.unwrap();
        assert_ne!(replacement.id, doc.id);
        f.service
            .reject(f.admin, replacement.id, "blurry photo".to_string(), None)
            .await
            .unwrap();

        let owner = identity(&f, f.farmer).await;
        assert_eq!(owner.kyc_status, KycStatus::Rejected);
        assert_eq!(owner.kyc_rejection_reason.as_deref(), Some("blurry photo"));
        assert!(!f.service.can_transact(f.farmer).await.unwrap());
    }

    #[tokio::test]
    async fn test_resubmission_reedits_rejected_document() {
        let f = fixture().await;
        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();
        f.service
            .reject(f.admin, doc.id, "name mismatch".to_string(), None)
            .await
            .unwrap();

        let resubmitted = f.service.submit(f.farmer, upload(None)).await.unwrap();
        assert_eq!(resubmitted.id, doc.id);
        assert_eq!(resubmitted.status, VerificationStatus::Pending);
        assert_eq!(resubmitted.submission_count, 2);
        assert_eq!(resubmitted.previous_submissions.len(), 1);
        assert_eq!(
            resubmitted.previous_submissions[0].rejection_reason,
            "name mismatch"
        );
        assert!(resubmitted.rejection_reason.is_none());
        assert_eq!(identity(&f, f.farmer).await.kyc_status, KycStatus::Submitted);
    }

    #[tokio::test]
    async fn test_cannot_upload_while_awaiting_review() {
        let f = fixture().await;
        f.service.submit(f.farmer, upload(None)).await.unwrap();
        assert!(matches!(
            f.service.submit(f.farmer, upload(None)).await,
            Err(KycError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_verified_document_cannot_be_verified_again() {
        let f = fixture().await;
        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();
        f.service.verify(f.admin, doc.id, None).await.unwrap();
        assert!(matches!(
            f.service.verify(f.admin, doc.id, None).await,
            Err(KycError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.service.reject(f.admin, doc.id, "late".to_string(), None).await,
            Err(KycError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_admins_review() {
        let f = fixture().await;
        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();
        assert!(matches!(
            f.service.verify(f.farmer, doc.id, None).await,
            Err(KycError::NotReviewer)
        ));
        assert!(matches!(
            f.service.pending_count(f.farmer).await,
            Err(KycError::NotReviewer)
        ));
        assert_eq!(f.service.pending_count(f.admin).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_verified_document_lapses_identity() {
        let f = fixture().await;
        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();
        f.service.verify(f.admin, doc.id, None).await.unwrap();
        assert!(f.service.can_transact(f.farmer).await.unwrap());

        // Backdate the expiry as if time had passed
        let mut stored = f.store.find(doc.id).await.unwrap().unwrap();
        stored.expiry_date = NaiveDate::from_ymd_opt(2000, 1, 1);
        KycStore::update(f.store.as_ref(), &stored, VerificationStatus::Verified, None)
            .await
            .unwrap();

        let read = f.service.get_for_review(f.admin, doc.id).await.unwrap();
        assert_eq!(read.status, VerificationStatus::Expired);
        assert_eq!(identity(&f, f.farmer).await.kyc_status, KycStatus::Pending);
        assert!(!f.service.can_transact(f.farmer).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_document_cannot_be_verified() {
        let f = fixture().await;
        let doc = f
            .service
            .submit(f.farmer, upload(NaiveDate::from_ymd_opt(2001, 6, 30)))
            .await
            .unwrap();
        assert!(matches!(
            f.service.verify(f.admin, doc.id, None).await,
            Err(KycError::InvalidTransition { from: "expired", .. })
        ));
    }

    #[tokio::test]
    async fn test_record_checks_and_bad_images() {
        let f = fixture().await;
        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();
        let checks = VerificationChecks {
            photo_quality_clear: true,
            document_number_matches: true,
            name_matches: true,
            not_expired: true,
            no_tampering: true,
        };
        let updated = f.service.record_checks(f.admin, doc.id, checks).await.unwrap();
        assert_eq!(updated.checks, checks);

        let mut bad = upload(None);
        bad.front_image = "%%%".to_string();
        let other = f.store.find_by_phone("254700000001").await.unwrap().unwrap();
        assert!(matches!(
            f.service.submit(other.id, bad).await,
            Err(KycError::InvalidDocument(_))
        ));
    }

    #[tokio::test]
    async fn test_racing_verify_and_reject_leave_one_outcome() {
        let f = fixture().await;
        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();
        f.service.start_review(f.admin, doc.id).await.unwrap();

        let (verified, rejected) = tokio::join!(
            f.service.verify(f.admin, doc.id, None),
            f.service.reject(f.admin, doc.id, "Blurry photo".to_string(), None),
        );
        assert!(verified.is_ok() != rejected.is_ok());
        assert!(matches!(
            verified.err().or(rejected.err()),
            Some(KycError::InvalidTransition { .. })
        ));

        let stored = f.store.find(doc.id).await.unwrap().unwrap();
        let owner = identity(&f, f.farmer).await;
        match stored.status {
            VerificationStatus::Verified => {
                assert_eq!(owner.kyc_status, KycStatus::KycVerified);
                assert!(owner.kyc_rejection_reason.is_none());
            }
            VerificationStatus::Rejected => {
                assert_eq!(owner.kyc_status, KycStatus::Rejected);
                assert_eq!(owner.kyc_rejection_reason.as_deref(), Some("Blurry photo"));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_document_write_changes_nothing() {
        let f = fixture().await;
        let doc = f.service.submit(f.farmer, upload(None)).await.unwrap();
        let mut stale = f.store.find(doc.id).await.unwrap().unwrap();
        f.service.verify(f.admin, doc.id, None).await.unwrap();

        // A reviewer still holding the pending copy tries to reject it
        stale.status = VerificationStatus::Rejected;
        stale.rejection_reason = Some("late".to_string());
        let rejection = VerificationUpdate {
            kyc_status: KycStatus::Rejected,
            status: AccountStatus::Active,
            kyc_rejection_reason: Some("late".to_string()),
        };
        let err = KycStore::update(
            f.store.as_ref(),
            &stale,
            VerificationStatus::Pending,
            Some(&rejection),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict));

        let stored = f.store.find(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VerificationStatus::Verified);
        assert!(stored.rejection_reason.is_none());
        assert_eq!(identity(&f, f.farmer).await.kyc_status, KycStatus::KycVerified);
    }
}
