//! KYC document models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Supported identity documents
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "document_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    NationalId,
    Passport,
    DrivingLicense,
    BusinessPermit,
}

/// Document-level verification status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "verification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    UnderReview,
    Verified,
    Rejected,
    Expired,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::UnderReview => "under_review",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
            VerificationStatus::Expired => "expired",
        }
    }

    /// States from which a reviewer may verify or reject
    pub fn is_reviewable(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Pending
                | VerificationStatus::UnderReview
                | VerificationStatus::Rejected
        )
    }
}

/// Reviewer checklist
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationChecks {
    pub photo_quality_clear: bool,
    pub document_number_matches: bool,
    pub name_matches: bool,
    pub not_expired: bool,
    pub no_tampering: bool,
}

/// A submission that was rejected
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriorSubmission {
    pub submitted_at: DateTime<Utc>,
    pub rejected_at: DateTime<Utc>,
    pub rejection_reason: String,
}

/// An uploaded image; the storage reference is sealed at rest
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredImage {
    #[serde(skip_serializing)]
    pub sealed_reference: String,
    pub uploaded_at: DateTime<Utc>,
}

/// KYC document owned by one identity
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KycDocument {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub document_type: DocumentType,
    pub front_image: StoredImage,
    pub back_image: Option<StoredImage>,
    pub document_number: Option<String>,
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub status: VerificationStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub admin_notes: Option<String>,
    pub checks: VerificationChecks,
    pub submission_count: i32,
    pub previous_submissions: Vec<PriorSubmission>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KycDocument {
    /// Whether the document's expiry date has passed as of `today`
    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|d| d < today).unwrap_or(false)
    }
}

/// Extracted fields supplied with an upload
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetails {
    pub document_number: Option<String>,
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
}

/// Upload request (images are base64 encoded)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDocumentRequest {
    pub document_type: DocumentType,
    pub front_image: String,
    pub back_image: Option<String>,
    #[serde(flatten)]
    pub details: DocumentDetails,
}

/// Reviewer verify request
#[derive(Debug, Deserialize, Default)]
pub struct VerifyDocumentRequest {
    pub notes: Option<String>,
}

/// Reviewer reject request
#[derive(Debug, Deserialize)]
pub struct RejectDocumentRequest {
    pub reason: String,
    pub notes: Option<String>,
}

/// Pending review queue size
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCountResponse {
    pub pending: i64,
}

/// Which side of a document an image shows
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageSide {
    Front,
    Back,
}

/// Decrypted image handed to a reviewer
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentImageResponse {
    pub document_id: Uuid,
    pub content_base64: String,
}
