//! PostgreSQL store implementations

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::escrow::{
    CallbackOutcome, EscrowEntry, EscrowState, EventKind, Financials, LedgerEntry, Order,
    OrderStatus, PaymentStatus,
};
use crate::kyc::{
    DocumentType, KycDocument, PriorSubmission, StoredImage, VerificationChecks,
    VerificationStatus,
};
use crate::models::{Identity, Money, Profile, VerificationUpdate};

use super::{IdentityStore, KycStore, SettlementStore, StoreError};

const IDENTITY_COLUMNS: &str = r#"
    id, phone, email, national_id_hash, national_id_encrypted, role, status,
    kyc_status, kyc_rejection_reason, is_phone_verified, is_email_verified,
    last_login, refresh_tokens, created_at, updated_at
"#;

const KYC_COLUMNS: &str = r#"
    id, identity_id, document_type, front_image, back_image, document_number,
    full_name, date_of_birth, expiry_date, status, reviewed_by, reviewed_at,
    rejection_reason, admin_notes, checks, submission_count, previous_submissions,
    submitted_at, updated_at
"#;

const ORDER_COLUMNS: &str = r#"
    id, buyer_id, seller_id, listing_id, total_amount, delivery_fee, status,
    payment_status, gateway_request_id, collection_started_at,
    payment_transaction_id, payment_failure_reason, financials, version,
    created_at, updated_at
"#;

const ESCROW_COLUMNS: &str = r#"
    order_id, seller_id, financials, state, payout_request_id,
    payout_transaction_id, failure_reason, payout_attempts, released_at,
    created_at, updated_at
"#;

/// Postgres-backed identity, KYC and settlement store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_identity_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let sql = format!("SELECT {} FROM identities WHERE {} = $1", IDENTITY_COLUMNS, clause);
        Ok(sqlx::query_as::<_, Identity>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn create_with_profile(
        &self,
        identity: &Identity,
        profile: &Profile,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO identities (
                id, phone, email, national_id_hash, national_id_encrypted, role, status,
                kyc_status, kyc_rejection_reason, is_phone_verified, is_email_verified,
                last_login, refresh_tokens, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(identity.id)
        .bind(&identity.phone)
        .bind(&identity.email)
        .bind(&identity.national_id_hash)
        .bind(&identity.national_id_encrypted)
        .bind(identity.role)
        .bind(identity.status)
        .bind(identity.kyc_status)
        .bind(&identity.kyc_rejection_reason)
        .bind(identity.is_phone_verified)
        .bind(identity.is_email_verified)
        .bind(identity.last_login)
        .bind(&identity.refresh_tokens)
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO profiles (
                id, identity_id, full_names, longitude, latitude, address,
                farm_name, business_name, vehicle_type, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(profile.id)
        .bind(profile.identity_id)
        .bind(&profile.full_names)
        .bind(profile.longitude)
        .bind(profile.latitude)
        .bind(&profile.address)
        .bind(&profile.farm_name)
        .bind(&profile.business_name)
        .bind(&profile.vehicle_type)
        .bind(profile.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let sql = format!("SELECT {} FROM identities WHERE id = $1", IDENTITY_COLUMNS);
        Ok(sqlx::query_as::<_, Identity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Identity>, StoreError> {
        self.find_identity_where("phone", phone).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        self.find_identity_where("email", &email.trim().to_lowercase())
            .await
    }

    async fn find_by_national_id_hash(
        &self,
        hash: &str,
    ) -> Result<Option<Identity>, StoreError> {
        self.find_identity_where("national_id_hash", hash).await
    }

    async fn find_profile(&self, identity_id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(sqlx::query_as::<_, Profile>(
            r#"
            SELECT id, identity_id, full_names, longitude, latitude, address,
                   farm_name, business_name, vehicle_type, created_at
            FROM profiles
            WHERE identity_id = $1
            "#,
        )
        .bind(identity_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<Identity, StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_verification(&mut conn, id, update).await
    }

    async fn record_login(&self, id: Uuid) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE identities SET last_login = NOW(), updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn push_refresh_hash(
        &self,
        id: Uuid,
        hash: &str,
        cap: usize,
    ) -> Result<(), StoreError> {
        // Keep the newest `cap` entries; array slices are 1-based and inclusive
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET refresh_tokens = (array_append(refresh_tokens, $2))[
                    GREATEST(cardinality(refresh_tokens) + 1 - $3 + 1, 1):
                ],
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(hash)
        .bind(cap as i32)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn take_refresh_hash(&self, id: Uuid, hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET refresh_tokens = array_remove(refresh_tokens, $2), updated_at = NOW()
            WHERE id = $1 AND $2 = ANY(refresh_tokens)
            "#,
        )
        .bind(id)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(sqlx::FromRow)]
struct KycRow {
    id: Uuid,
    identity_id: Uuid,
    document_type: DocumentType,
    front_image: Json<StoredImage>,
    back_image: Option<Json<StoredImage>>,
    document_number: Option<String>,
    full_name: Option<String>,
    date_of_birth: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    status: VerificationStatus,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    admin_notes: Option<String>,
    checks: Json<VerificationChecks>,
    submission_count: i32,
    previous_submissions: Json<Vec<PriorSubmission>>,
    submitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<KycRow> for KycDocument {
    fn from(row: KycRow) -> Self {
        Self {
            id: row.id,
            identity_id: row.identity_id,
            document_type: row.document_type,
            front_image: row.front_image.0,
            back_image: row.back_image.map(|j| j.0),
            document_number: row.document_number,
            full_name: row.full_name,
            date_of_birth: row.date_of_birth,
            expiry_date: row.expiry_date,
            status: row.status,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            rejection_reason: row.rejection_reason,
            admin_notes: row.admin_notes,
            checks: row.checks.0,
            submission_count: row.submission_count,
            previous_submissions: row.previous_submissions.0,
            submitted_at: row.submitted_at,
            updated_at: row.updated_at,
        }
    }
}

/// Images are stored with their sealed reference, which the API view skips
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageColumn<'a> {
    sealed_reference: &'a str,
    uploaded_at: DateTime<Utc>,
}

impl<'a> From<&'a StoredImage> for ImageColumn<'a> {
    fn from(image: &'a StoredImage) -> Self {
        Self {
            sealed_reference: &image.sealed_reference,
            uploaded_at: image.uploaded_at,
        }
    }
}

#[async_trait]
impl KycStore for PgStore {
    async fn insert(
        &self,
        document: &KycDocument,
        owner: Option<&VerificationUpdate>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO kyc_documents (
                id, identity_id, document_type, front_image, back_image, document_number,
                full_name, date_of_birth, expiry_date, status, reviewed_by, reviewed_at,
                rejection_reason, admin_notes, checks, submission_count, previous_submissions,
                submitted_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(document.id)
        .bind(document.identity_id)
        .bind(document.document_type)
        .bind(Json(ImageColumn::from(&document.front_image)))
        .bind(document.back_image.as_ref().map(|i| Json(ImageColumn::from(i))))
        .bind(&document.document_number)
        .bind(&document.full_name)
        .bind(document.date_of_birth)
        .bind(document.expiry_date)
        .bind(document.status)
        .bind(document.reviewed_by)
        .bind(document.reviewed_at)
        .bind(&document.rejection_reason)
        .bind(&document.admin_notes)
        .bind(Json(&document.checks))
        .bind(document.submission_count)
        .bind(Json(&document.previous_submissions))
        .bind(document.submitted_at)
        .bind(document.updated_at)
        .execute(&mut *tx)
        .await?;
        if let Some(update) = owner {
            write_verification(&mut tx, document.identity_id, update).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update(
        &self,
        document: &KycDocument,
        expected: VerificationStatus,
        owner: Option<&VerificationUpdate>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE kyc_documents
            SET document_type = $2, front_image = $3, back_image = $4, document_number = $5,
                full_name = $6, date_of_birth = $7, expiry_date = $8, status = $9,
                reviewed_by = $10, reviewed_at = $11, rejection_reason = $12, admin_notes = $13,
                checks = $14, submission_count = $15, previous_submissions = $16,
                submitted_at = $17, updated_at = $18
            WHERE id = $1 AND status = $19
            "#,
        )
        .bind(document.id)
        .bind(document.document_type)
        .bind(Json(ImageColumn::from(&document.front_image)))
        .bind(document.back_image.as_ref().map(|i| Json(ImageColumn::from(i))))
        .bind(&document.document_number)
        .bind(&document.full_name)
        .bind(document.date_of_birth)
        .bind(document.expiry_date)
        .bind(document.status)
        .bind(document.reviewed_by)
        .bind(document.reviewed_at)
        .bind(&document.rejection_reason)
        .bind(&document.admin_notes)
        .bind(Json(&document.checks))
        .bind(document.submission_count)
        .bind(Json(&document.previous_submissions))
        .bind(document.submitted_at)
        .bind(document.updated_at)
        .bind(expected)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            let exists: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM kyc_documents WHERE id = $1")
                    .bind(document.id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match exists {
                Some(_) => StoreError::VersionConflict,
                None => StoreError::NotFound,
            });
        }
        if let Some(update) = owner {
            write_verification(&mut tx, document.identity_id, update).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<KycDocument>, StoreError> {
        let sql = format!("SELECT {} FROM kyc_documents WHERE id = $1", KYC_COLUMNS);
        Ok(sqlx::query_as::<_, KycRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(KycDocument::from))
    }

    async fn find_latest_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<KycDocument>, StoreError> {
        let sql = format!(
            "SELECT {} FROM kyc_documents WHERE identity_id = $1 ORDER BY submitted_at DESC LIMIT 1",
            KYC_COLUMNS
        );
        Ok(sqlx::query_as::<_, KycRow>(&sql)
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await?
            .map(KycDocument::from))
    }

    async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM kyc_documents WHERE status IN ('pending', 'under_review')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    listing_id: Uuid,
    total_amount: Money,
    delivery_fee: Money,
    status: OrderStatus,
    payment_status: PaymentStatus,
    gateway_request_id: Option<String>,
    collection_started_at: Option<DateTime<Utc>>,
    payment_transaction_id: Option<String>,
    payment_failure_reason: Option<String>,
    financials: Option<Json<Financials>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            buyer_id: row.buyer_id,
            seller_id: row.seller_id,
            listing_id: row.listing_id,
            total_amount: row.total_amount,
            delivery_fee: row.delivery_fee,
            status: row.status,
            payment_status: row.payment_status,
            gateway_request_id: row.gateway_request_id,
            collection_started_at: row.collection_started_at,
            payment_transaction_id: row.payment_transaction_id,
            payment_failure_reason: row.payment_failure_reason,
            financials: row.financials.map(|j| j.0),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EscrowRow {
    order_id: Uuid,
    seller_id: Uuid,
    financials: Json<Financials>,
    state: EscrowState,
    payout_request_id: Option<String>,
    payout_transaction_id: Option<String>,
    failure_reason: Option<String>,
    payout_attempts: i32,
    released_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EscrowRow> for EscrowEntry {
    fn from(row: EscrowRow) -> Self {
        Self {
            order_id: row.order_id,
            seller_id: row.seller_id,
            financials: row.financials.0,
            state: row.state,
            payout_request_id: row.payout_request_id,
            payout_transaction_id: row.payout_transaction_id,
            failure_reason: row.failure_reason,
            payout_attempts: row.payout_attempts,
            released_at: row.released_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    kind: EventKind,
    gateway_transaction_id: String,
    order_id: Uuid,
    outcome: String,
    reason_code: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: row.kind,
            gateway_transaction_id: row.gateway_transaction_id,
            order_id: row.order_id,
            outcome: row.outcome.parse::<CallbackOutcome>().map_err(StoreError::Backend)?,
            reason_code: row.reason_code,
            recorded_at: row.recorded_at,
        })
    }
}

/// Set an identity's verification fields
async fn write_verification(
    conn: &mut sqlx::PgConnection,
    id: Uuid,
    update: &VerificationUpdate,
) -> Result<Identity, StoreError> {
    let sql = format!(
        r#"
        UPDATE identities
        SET kyc_status = $2, status = $3, kyc_rejection_reason = $4, updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        IDENTITY_COLUMNS
    );
    sqlx::query_as::<_, Identity>(&sql)
        .bind(id)
        .bind(update.kyc_status)
        .bind(update.status)
        .bind(&update.kyc_rejection_reason)
        .fetch_optional(conn)
        .await?
        .ok_or(StoreError::NotFound)
}

/// Apply a full order row under an optimistic version check
async fn write_order(
    conn: &mut sqlx::PgConnection,
    order: &Order,
    expected_version: i64,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = $3, payment_status = $4, gateway_request_id = $5,
            collection_started_at = $6, payment_transaction_id = $7,
            payment_failure_reason = $8, financials = $9, version = $10, updated_at = $11
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(order.id)
    .bind(expected_version)
    .bind(order.status)
    .bind(order.payment_status)
    .bind(&order.gateway_request_id)
    .bind(order.collection_started_at)
    .bind(&order.payment_transaction_id)
    .bind(&order.payment_failure_reason)
    .bind(order.financials.as_ref().map(Json))
    .bind(order.version)
    .bind(order.updated_at)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Insert a ledger row unless the event is already recorded
async fn record_event(
    conn: &mut sqlx::PgConnection,
    entry: &LedgerEntry,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO payment_events (kind, gateway_transaction_id, order_id, outcome, reason_code, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (kind, gateway_transaction_id) DO NOTHING
        "#,
    )
    .bind(entry.kind)
    .bind(&entry.gateway_transaction_id)
    .bind(entry.order_id)
    .bind(entry.outcome.as_str())
    .bind(&entry.reason_code)
    .bind(entry.recorded_at)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::DuplicateEvent);
    }
    Ok(())
}

#[async_trait]
impl SettlementStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, buyer_id, seller_id, listing_id, total_amount, delivery_fee, status,
                payment_status, gateway_request_id, collection_started_at,
                payment_transaction_id, payment_failure_reason, financials, version,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(order.id)
        .bind(order.buyer_id)
        .bind(order.seller_id)
        .bind(order.listing_id)
        .bind(order.total_amount)
        .bind(order.delivery_fee)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(&order.gateway_request_id)
        .bind(order.collection_started_at)
        .bind(&order.payment_transaction_id)
        .bind(&order.payment_failure_reason)
        .bind(order.financials.as_ref().map(Json))
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        Ok(sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::from))
    }

    async fn update_order(&self, order: &Order, expected_version: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        if write_order(&mut conn, order, expected_version).await? == 0 {
            return Err(StoreError::VersionConflict);
        }
        Ok(())
    }

    async fn find_ledger_entry(
        &self,
        kind: EventKind,
        gateway_transaction_id: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT kind, gateway_transaction_id, order_id, outcome, reason_code, recorded_at
            FROM payment_events
            WHERE kind = $1 AND gateway_transaction_id = $2
            "#,
        )
        .bind(kind)
        .bind(gateway_transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn commit_collection(
        &self,
        order: &Order,
        expected_version: i64,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        record_event(&mut tx, entry).await?;
        if write_order(&mut tx, order, expected_version).await? == 0 {
            return Err(StoreError::VersionConflict);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_escrow(&self, order_id: Uuid) -> Result<Option<EscrowEntry>, StoreError> {
        let sql = format!("SELECT {} FROM escrow_entries WHERE order_id = $1", ESCROW_COLUMNS);
        Ok(sqlx::query_as::<_, EscrowRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .map(EscrowEntry::from))
    }

    async fn insert_escrow(&self, entry: &EscrowEntry) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO escrow_entries (
                order_id, seller_id, financials, state, payout_request_id,
                payout_transaction_id, failure_reason, payout_attempts, released_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(entry.order_id)
        .bind(entry.seller_id)
        .bind(Json(&entry.financials))
        .bind(entry.state)
        .bind(&entry.payout_request_id)
        .bind(&entry.payout_transaction_id)
        .bind(&entry.failure_reason)
        .bind(entry.payout_attempts)
        .bind(entry.released_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn swap_escrow(
        &self,
        entry: &EscrowEntry,
        expected_state: EscrowState,
        expected_attempts: i32,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        if write_escrow(&mut conn, entry, expected_state, expected_attempts).await? == 1 {
            return Ok(true);
        }
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT order_id FROM escrow_entries WHERE order_id = $1")
                .bind(entry.order_id)
                .fetch_optional(&mut *conn)
                .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    async fn commit_payout(
        &self,
        escrow: &EscrowEntry,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        record_event(&mut tx, entry).await?;
        let written = write_escrow(
            &mut tx,
            escrow,
            EscrowState::ReleasePending,
            escrow.payout_attempts,
        )
        .await?;
        if written == 0 {
            return Err(StoreError::VersionConflict);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_releasable_orders(
        &self,
        limit: i64,
        stale_claim_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT o.id
            FROM orders o
            LEFT JOIN escrow_entries e ON e.order_id = o.id
            WHERE o.status = 'completed'
              AND o.payment_status = 'paid'
              AND (
                e.state IS NULL
                OR e.state IN ('held', 'release_failed')
                OR (e.state = 'release_pending' AND e.payout_request_id IS NULL AND e.updated_at < $2)
              )
            ORDER BY o.updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(stale_claim_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Overwrite an escrow row if it is still in the expected state and attempt
async fn write_escrow(
    conn: &mut sqlx::PgConnection,
    entry: &EscrowEntry,
    expected_state: EscrowState,
    expected_attempts: i32,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE escrow_entries
        SET state = $4, payout_request_id = $5, payout_transaction_id = $6,
            failure_reason = $7, payout_attempts = $8, released_at = $9, updated_at = $10
        WHERE order_id = $1 AND state = $2 AND payout_attempts = $3
        "#,
    )
    .bind(entry.order_id)
    .bind(expected_state)
    .bind(expected_attempts)
    .bind(entry.state)
    .bind(&entry.payout_request_id)
    .bind(&entry.payout_transaction_id)
    .bind(&entry.failure_reason)
    .bind(entry.payout_attempts)
    .bind(entry.released_at)
    .bind(entry.updated_at)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
