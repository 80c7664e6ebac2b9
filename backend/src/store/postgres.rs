//! PostgreSQL adapter — the transactional source of truth.
//!
//! Startup creates any missing tables and indexes, including the unique
//! index on `transactions.tx_hash`. Queries are plain `sqlx::query` with
//! binds; unique-violation errors are translated to `StoreError::Conflict`.

use crate::governance::evaluate_transition;
use crate::schema::{
    ConfirmedScam, IdentitySession, NewProposal, NewRecovery, NewReport, NewTransaction, Proposal,
    ProposalStatus, Recovery, Report, ReportStatus, SenderStats, SessionStatus, Transaction,
    TxCounts, TxStatus, VerificationLog, Vote, VoteType, WalletAnalytics,
};
use crate::store::{Page, Store, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and initialize the schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id BIGSERIAL PRIMARY KEY,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                value DOUBLE PRECISION NOT NULL,
                currency TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                network TEXT NOT NULL,
                risk DOUBLE PRECISION NOT NULL,
                status TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                metadata JSONB NOT NULL
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_tx_hash ON transactions (tx_hash)",
            "CREATE INDEX IF NOT EXISTS idx_transactions_from ON transactions (from_address)",
            "CREATE INDEX IF NOT EXISTS idx_transactions_to ON transactions (to_address)",
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id BIGSERIAL PRIMARY KEY,
                reported_address TEXT NOT NULL,
                reporter_address TEXT NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                evidence TEXT NOT NULL,
                status TEXT NOT NULL,
                severity INT NOT NULL,
                priority TEXT NOT NULL,
                requires_immediate BOOLEAN NOT NULL,
                tx_hash TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_reports_reported ON reports (reported_address)",
            r#"
            CREATE TABLE IF NOT EXISTS dao_proposals (
                id BIGSERIAL PRIMARY KEY,
                suspicious_address TEXT NOT NULL,
                creator_address TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                evidence TEXT NOT NULL,
                votes_for BIGINT NOT NULL DEFAULT 0,
                votes_against BIGINT NOT NULL DEFAULT 0,
                start_time TIMESTAMPTZ NOT NULL,
                end_time TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_dao_proposals_address_status
                 ON dao_proposals (suspicious_address, status)",
            r#"
            CREATE TABLE IF NOT EXISTS dao_votes (
                proposal_id BIGINT NOT NULL,
                voter_address TEXT NOT NULL,
                vote_type TEXT NOT NULL,
                tokens BIGINT NOT NULL,
                power DOUBLE PRECISION NOT NULL,
                voted_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (proposal_id, voter_address)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS confirmed_scams (
                address TEXT PRIMARY KEY,
                scam_score BIGINT NOT NULL,
                proposal_id BIGINT NOT NULL,
                confirmed_at TIMESTAMPTZ NOT NULL,
                total_voters BIGINT NOT NULL,
                description TEXT NOT NULL,
                tx_hash TEXT,
                block_number BIGINT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS recoveries (
                id BIGSERIAL PRIMARY KEY,
                user_address TEXT NOT NULL,
                new_address TEXT NOT NULL,
                reason TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS civic_auth_sessions (
                id BIGSERIAL PRIMARY KEY,
                user_address TEXT NOT NULL,
                gatepass TEXT NOT NULL,
                status TEXT NOT NULL,
                security_level INT NOT NULL,
                device_hash TEXT NOT NULL,
                risk_score DOUBLE PRECISION NOT NULL,
                flags JSONB NOT NULL,
                token_expiry TIMESTAMPTZ NOT NULL,
                last_verified TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_status
                 ON civic_auth_sessions (user_address, status)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON civic_auth_sessions (token_expiry)",
            r#"
            CREATE TABLE IF NOT EXISTS civic_verification_logs (
                id BIGSERIAL PRIMARY KEY,
                user_address TEXT NOT NULL,
                verification_type TEXT NOT NULL,
                success BOOLEAN NOT NULL,
                device_info TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                geo_location TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_verification_logs_user
                 ON civic_verification_logs (user_address)",
            "CREATE INDEX IF NOT EXISTS idx_verification_logs_created
                 ON civic_verification_logs (created_at)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

/// Map unique-constraint violations to `Conflict`, everything else to
/// `Backend`.
fn map_sqlx_conflict(err: sqlx::Error) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

// ── Row decoding ────────────────────────────────────────────────

fn tx_from_row(row: sqlx::postgres::PgRow) -> StoreResult<Transaction> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Transaction {
        id: row.try_get("id").map_err(backend)?,
        from_address: row.try_get("from_address").map_err(backend)?,
        to_address: row.try_get("to_address").map_err(backend)?,
        value: row.try_get("value").map_err(backend)?,
        currency: row.try_get("currency").map_err(backend)?,
        tx_hash: row.try_get("tx_hash").map_err(backend)?,
        network: row.try_get("network").map_err(backend)?,
        risk: row.try_get("risk").map_err(backend)?,
        status: TxStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown tx status {status}")))?,
        timestamp: row.try_get("timestamp").map_err(backend)?,
        metadata: row.try_get("metadata").map_err(backend)?,
    })
}

fn report_from_row(row: sqlx::postgres::PgRow) -> StoreResult<Report> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Report {
        id: row.try_get("id").map_err(backend)?,
        reported_address: row.try_get("reported_address").map_err(backend)?,
        reporter_address: row.try_get("reporter_address").map_err(backend)?,
        category: row.try_get("category").map_err(backend)?,
        description: row.try_get("description").map_err(backend)?,
        evidence: row.try_get("evidence").map_err(backend)?,
        status: ReportStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown report status {status}")))?,
        severity: row.try_get("severity").map_err(backend)?,
        priority: row.try_get("priority").map_err(backend)?,
        requires_immediate: row.try_get("requires_immediate").map_err(backend)?,
        tx_hash: row.try_get("tx_hash").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn proposal_from_row(row: sqlx::postgres::PgRow) -> StoreResult<Proposal> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Proposal {
        id: row.try_get("id").map_err(backend)?,
        suspicious_address: row.try_get("suspicious_address").map_err(backend)?,
        creator_address: row.try_get("creator_address").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        description: row.try_get("description").map_err(backend)?,
        evidence: row.try_get("evidence").map_err(backend)?,
        votes_for: row.try_get("votes_for").map_err(backend)?,
        votes_against: row.try_get("votes_against").map_err(backend)?,
        start_time: row.try_get("start_time").map_err(backend)?,
        end_time: row.try_get("end_time").map_err(backend)?,
        status: ProposalStatus::parse(&status).ok_or_else(|| {
            StoreError::Serialization(format!("unknown proposal status {status}"))
        })?,
    })
}

fn scam_from_row(row: sqlx::postgres::PgRow) -> StoreResult<ConfirmedScam> {
    Ok(ConfirmedScam {
        address: row.try_get("address").map_err(backend)?,
        scam_score: row.try_get("scam_score").map_err(backend)?,
        proposal_id: row.try_get("proposal_id").map_err(backend)?,
        confirmed_at: row.try_get("confirmed_at").map_err(backend)?,
        total_voters: row.try_get("total_voters").map_err(backend)?,
        description: row.try_get("description").map_err(backend)?,
        tx_hash: row.try_get("tx_hash").map_err(backend)?,
        block_number: row.try_get("block_number").map_err(backend)?,
    })
}

fn session_from_row(row: sqlx::postgres::PgRow) -> StoreResult<IdentitySession> {
    let status: String = row.try_get("status").map_err(backend)?;
    let flags: serde_json::Value = row.try_get("flags").map_err(backend)?;
    Ok(IdentitySession {
        id: row.try_get("id").map_err(backend)?,
        user_address: row.try_get("user_address").map_err(backend)?,
        gatepass: row.try_get("gatepass").map_err(backend)?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown session status {status}")))?,
        security_level: row.try_get("security_level").map_err(backend)?,
        device_hash: row.try_get("device_hash").map_err(backend)?,
        risk_score: row.try_get("risk_score").map_err(backend)?,
        flags: serde_json::from_value(flags).map_err(|e| StoreError::Serialization(e.to_string()))?,
        token_expiry: row.try_get("token_expiry").map_err(backend)?,
        last_verified: row.try_get("last_verified").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn recovery_from_row(row: sqlx::postgres::PgRow) -> StoreResult<Recovery> {
    Ok(Recovery {
        id: row.try_get("id").map_err(backend)?,
        user_address: row.try_get("user_address").map_err(backend)?,
        new_address: row.try_get("new_address").map_err(backend)?,
        reason: row.try_get("reason").map_err(backend)?,
        status: row.try_get("status").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

/// Upsert SQL for the confirmed-scam projection.
///
/// The `WHERE` clause is the SQL form of `scam_record_dominates`:
/// chain-sourced rows (block_number set) replace local mirrors and earlier
/// blocks; local rows only replace other local rows with an older
/// `confirmed_at`.
const UPSERT_SCAM_SQL: &str = r#"
    INSERT INTO confirmed_scams
        (address, scam_score, proposal_id, confirmed_at, total_voters,
         description, tx_hash, block_number)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (address) DO UPDATE SET
        scam_score = EXCLUDED.scam_score,
        proposal_id = EXCLUDED.proposal_id,
        confirmed_at = EXCLUDED.confirmed_at,
        total_voters = EXCLUDED.total_voters,
        description = EXCLUDED.description,
        tx_hash = EXCLUDED.tx_hash,
        block_number = EXCLUDED.block_number
    WHERE
        (EXCLUDED.block_number IS NOT NULL
            AND (confirmed_scams.block_number IS NULL
                 OR EXCLUDED.block_number >= confirmed_scams.block_number))
        OR (EXCLUDED.block_number IS NULL
            AND confirmed_scams.block_number IS NULL
            AND EXCLUDED.confirmed_at >= confirmed_scams.confirmed_at)
"#;

async fn upsert_scam_exec<'e, E>(exec: E, scam: &ConfirmedScam) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(UPSERT_SCAM_SQL)
        .bind(&scam.address)
        .bind(scam.scam_score)
        .bind(scam.proposal_id)
        .bind(scam.confirmed_at)
        .bind(scam.total_voters)
        .bind(&scam.description)
        .bind(&scam.tx_hash)
        .bind(scam.block_number)
        .execute(exec)
        .await
        .map(|_| ())
}

#[async_trait]
impl Store for PgStore {
    // ── Transactions ────────────────────────────────────────────

    async fn insert_transaction(&self, tx: NewTransaction) -> StoreResult<Transaction> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions
                (from_address, to_address, value, currency, tx_hash, network,
                 risk, status, timestamp, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(tx.value)
        .bind(&tx.currency)
        .bind(&tx.tx_hash)
        .bind(&tx.network)
        .bind(tx.risk)
        .bind(tx.status.as_str())
        .bind(Utc::now())
        .bind(&tx.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;

        tx_from_row(row)
    }

    async fn transactions_by_address(
        &self,
        address: &str,
        page: Page,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
             WHERE from_address = $1 OR to_address = $1
             ORDER BY timestamp DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(address)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(tx_from_row).collect()
    }

    async fn transaction_counts(&self) -> StoreResult<TxCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM transactions GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut counts = TxCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(backend)?;
            let n: i64 = row.try_get("n").map_err(backend)?;
            let n = n as u64;
            counts.total += n;
            match TxStatus::parse(&status) {
                Some(TxStatus::Safe) => counts.safe += n,
                Some(TxStatus::Suspicious) => counts.suspicious += n,
                Some(TxStatus::Blocked) => counts.blocked += n,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn wallet_analytics(&self, address: &str) -> StoreResult<WalletAnalytics> {
        let sent = sqlx::query(
            r#"
            SELECT COUNT(*) AS n,
                   COALESCE(SUM(value), 0)  AS total,
                   COALESCE(AVG(value), 0)  AS avg,
                   MIN(timestamp)           AS first,
                   MAX(timestamp)           AS last
              FROM transactions
             WHERE from_address = $1 AND currency = 'ETH'
            "#,
        )
        .bind(address)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let received = sqlx::query(
            r#"
            SELECT COUNT(*) AS n,
                   COALESCE(SUM(value), 0)  AS total,
                   COALESCE(MAX(value), 0)  AS max,
                   COALESCE(AVG(value), 0)  AS avg,
                   MIN(timestamp)           AS first,
                   MAX(timestamp)           AS last
              FROM transactions
             WHERE to_address = $1 AND currency = 'ETH'
            "#,
        )
        .bind(address)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let erc20 = sqlx::query(
            r#"
            SELECT COALESCE(SUM(value) FILTER (WHERE from_address = $1), 0) AS sent_total,
                   COALESCE(SUM(value) FILTER (WHERE to_address = $1), 0)   AS recv_total,
                   COUNT(DISTINCT to_address) FILTER (WHERE from_address = $1) AS uniq_sent,
                   COUNT(DISTINCT currency) FILTER (WHERE to_address = $1)     AS uniq_recv
              FROM transactions
             WHERE (from_address = $1 OR to_address = $1) AND currency <> 'ETH'
            "#,
        )
        .bind(address)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let most_sent_token: Option<String> = sqlx::query_scalar(
            r#"
            SELECT currency FROM transactions
             WHERE from_address = $1 AND currency <> 'ETH'
             GROUP BY currency ORDER BY COUNT(*) DESC LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let most_received_token: Option<String> = sqlx::query_scalar(
            r#"
            SELECT currency FROM transactions
             WHERE to_address = $1 AND currency <> 'ETH'
             GROUP BY currency ORDER BY COUNT(*) DESC LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let sent_n: i64 = sent.try_get("n").map_err(backend)?;
        let sent_total: f64 = sent.try_get("total").map_err(backend)?;
        let sent_avg: f64 = sent.try_get("avg").map_err(backend)?;
        let sent_first: Option<DateTime<Utc>> = sent.try_get("first").map_err(backend)?;
        let sent_last: Option<DateTime<Utc>> = sent.try_get("last").map_err(backend)?;

        let recv_n: i64 = received.try_get("n").map_err(backend)?;
        let recv_total: f64 = received.try_get("total").map_err(backend)?;
        let recv_max: f64 = received.try_get("max").map_err(backend)?;
        let recv_avg: f64 = received.try_get("avg").map_err(backend)?;
        let recv_first: Option<DateTime<Utc>> = received.try_get("first").map_err(backend)?;
        let recv_last: Option<DateTime<Utc>> = received.try_get("last").map_err(backend)?;

        let erc20_sent: f64 = erc20.try_get("sent_total").map_err(backend)?;
        let erc20_recv: f64 = erc20.try_get("recv_total").map_err(backend)?;
        let uniq_sent: i64 = erc20.try_get("uniq_sent").map_err(backend)?;
        let uniq_recv: i64 = erc20.try_get("uniq_recv").map_err(backend)?;

        let first = match (sent_first, recv_first) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let last = match (sent_last, recv_last) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        Ok(WalletAnalytics {
            avg_min_between_sent: span_minutes(sent_first, sent_last, sent_n),
            avg_min_between_received: span_minutes(recv_first, recv_last, recv_n),
            time_diff_first_last_mins: match (first, last) {
                (Some(f), Some(l)) => (l - f).num_seconds() as f64 / 60.0,
                _ => 0.0,
            },
            sent_count: sent_n as f64,
            received_count: recv_n as f64,
            created_contracts: 0.0,
            max_value_received: recv_max,
            avg_value_received: recv_avg,
            avg_value_sent: sent_avg,
            total_ether_sent: sent_total,
            total_ether_balance: recv_total - sent_total,
            erc20_total_received: erc20_recv,
            erc20_total_sent: erc20_sent,
            // Approximated as all token sends.
            erc20_total_sent_contract: erc20_sent,
            erc20_uniq_sent_addresses: uniq_sent as f64,
            erc20_uniq_received_tokens: uniq_recv as f64,
            most_sent_token: most_sent_token.unwrap_or_default(),
            most_received_token: most_received_token.unwrap_or_default(),
        })
    }

    async fn sender_stats(
        &self,
        from: &str,
        to: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<SenderStats> {
        let mean: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(AVG(value), 0) FROM transactions
             WHERE from_address = $1 AND timestamp > $2
            "#,
        )
        .bind(from)
        .bind(now - Duration::hours(24))
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let seen: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE from_address = $1 AND to_address = $2)",
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(SenderStats {
            mean_value_24h: mean,
            has_sent_to_recipient: seen,
        })
    }

    // ── Reports ─────────────────────────────────────────────────

    async fn insert_report(&self, report: NewReport) -> StoreResult<Report> {
        let row = sqlx::query(
            r#"
            INSERT INTO reports
                (reported_address, reporter_address, category, description,
                 evidence, status, severity, priority, requires_immediate,
                 tx_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, $10)
            RETURNING *
            "#,
        )
        .bind(&report.reported_address)
        .bind(&report.reporter_address)
        .bind(&report.category)
        .bind(&report.description)
        .bind(&report.evidence)
        .bind(ReportStatus::Pending.as_str())
        .bind(report.severity)
        .bind(&report.priority)
        .bind(report.requires_immediate)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        report_from_row(row)
    }

    async fn get_report(&self, id: i64) -> StoreResult<Option<Report>> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(report_from_row).transpose()
    }

    async fn update_report_status(
        &self,
        id: i64,
        status: ReportStatus,
        tx_hash: Option<String>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE reports SET status = $1, tx_hash = COALESCE($2, tx_hash) WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(tx_hash)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("report {id} not found")));
        }
        Ok(())
    }

    // ── Governance ──────────────────────────────────────────────

    async fn insert_proposal(&self, proposal: NewProposal) -> StoreResult<Proposal> {
        let row = sqlx::query(
            r#"
            INSERT INTO dao_proposals
                (suspicious_address, creator_address, title, description,
                 evidence, votes_for, votes_against, start_time, end_time, status)
            VALUES ($1, $2, $3, $4, $5, 0, 0, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&proposal.suspicious_address)
        .bind(&proposal.creator_address)
        .bind(&proposal.title)
        .bind(&proposal.description)
        .bind(&proposal.evidence)
        .bind(proposal.start_time)
        .bind(proposal.end_time)
        .bind(ProposalStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        proposal_from_row(row)
    }

    async fn get_proposal(&self, id: i64) -> StoreResult<Option<Proposal>> {
        let row = sqlx::query("SELECT * FROM dao_proposals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(proposal_from_row).transpose()
    }

    async fn list_proposals(&self, page: Page) -> StoreResult<Vec<Proposal>> {
        let rows = sqlx::query(
            "SELECT * FROM dao_proposals ORDER BY start_time DESC LIMIT $1 OFFSET $2",
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(proposal_from_row).collect()
    }

    async fn has_active_proposal_for(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM dao_proposals
                 WHERE suspicious_address = $1 AND status = 'active' AND end_time > $2
            )
            "#,
        )
        .bind(address)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }

    async fn cast_vote(
        &self,
        vote: Vote,
        quorum: u64,
        scam_threshold_pct: u64,
    ) -> StoreResult<Proposal> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        // Row lock serializes concurrent votes on the same proposal.
        let row = sqlx::query("SELECT * FROM dao_proposals WHERE id = $1 FOR UPDATE")
            .bind(vote.proposal_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

        let proposal = match row {
            Some(row) => proposal_from_row(row)?,
            None => {
                return Err(StoreError::NotFound(format!(
                    "proposal {} not found",
                    vote.proposal_id
                )))
            }
        };

        if proposal.status != ProposalStatus::Active {
            return Err(StoreError::InvalidInput(format!(
                "proposal {} is not active",
                proposal.id
            )));
        }
        if vote.voted_at > proposal.end_time {
            return Err(StoreError::InvalidInput(format!(
                "voting period for proposal {} has ended",
                proposal.id
            )));
        }

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM dao_votes WHERE proposal_id = $1 AND voter_address = $2)",
        )
        .bind(vote.proposal_id)
        .bind(&vote.voter_address)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        if already {
            return Err(StoreError::Conflict(format!(
                "address {} has already voted on proposal {}",
                vote.voter_address, vote.proposal_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO dao_votes
                (proposal_id, voter_address, vote_type, tokens, power, voted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(vote.proposal_id)
        .bind(&vote.voter_address)
        .bind(vote.vote_type.as_str())
        .bind(vote.tokens)
        .bind(vote.power)
        .bind(vote.voted_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_conflict)?;

        let (votes_for, votes_against) = match vote.vote_type {
            VoteType::For => (proposal.votes_for + 1, proposal.votes_against),
            VoteType::Against => (proposal.votes_for, proposal.votes_against + 1),
        };

        let next_status = evaluate_transition(votes_for, votes_against, quorum, scam_threshold_pct)
            .unwrap_or(ProposalStatus::Active);

        sqlx::query(
            r#"
            UPDATE dao_proposals
               SET votes_for = $1, votes_against = $2, status = $3
             WHERE id = $4
            "#,
        )
        .bind(votes_for)
        .bind(votes_against)
        .bind(next_status.as_str())
        .bind(proposal.id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if next_status == ProposalStatus::Passed {
            let total = votes_for + votes_against;
            let scam = ConfirmedScam {
                address: proposal.suspicious_address.clone(),
                scam_score: votes_for * 100 / total,
                proposal_id: proposal.id,
                confirmed_at: vote.voted_at,
                total_voters: total,
                description: proposal.description.clone(),
                tx_hash: None,
                block_number: None,
            };
            upsert_scam_exec(&mut *tx, &scam)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;

        Ok(Proposal {
            votes_for,
            votes_against,
            status: next_status,
            ..proposal
        })
    }

    // ── Confirmed scams ─────────────────────────────────────────

    async fn upsert_confirmed_scam(&self, scam: ConfirmedScam) -> StoreResult<()> {
        upsert_scam_exec(&self.pool, &scam).await.map_err(backend)
    }

    async fn get_confirmed_scam(&self, address: &str) -> StoreResult<Option<ConfirmedScam>> {
        let row = sqlx::query("SELECT * FROM confirmed_scams WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(scam_from_row).transpose()
    }

    // ── Recoveries ──────────────────────────────────────────────

    async fn insert_recovery(&self, recovery: NewRecovery) -> StoreResult<Recovery> {
        let row = sqlx::query(
            r#"
            INSERT INTO recoveries (user_address, new_address, reason, status, created_at)
            VALUES ($1, $2, $3, 'pending', $4)
            RETURNING *
            "#,
        )
        .bind(&recovery.user_address)
        .bind(&recovery.new_address)
        .bind(&recovery.reason)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        recovery_from_row(row)
    }

    async fn recoveries_for(&self, user_address: &str) -> StoreResult<Vec<Recovery>> {
        let rows = sqlx::query(
            "SELECT * FROM recoveries WHERE user_address = $1 ORDER BY created_at DESC",
        )
        .bind(user_address)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(recovery_from_row).collect()
    }

    // ── Identity sessions ───────────────────────────────────────

    async fn insert_session(&self, session: IdentitySession) -> StoreResult<IdentitySession> {
        let flags = serde_json::to_value(&session.flags)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let row = sqlx::query(
            r#"
            INSERT INTO civic_auth_sessions
                (user_address, gatepass, status, security_level, device_hash,
                 risk_score, flags, token_expiry, last_verified, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&session.user_address)
        .bind(&session.gatepass)
        .bind(session.status.as_str())
        .bind(session.security_level)
        .bind(&session.device_hash)
        .bind(session.risk_score)
        .bind(flags)
        .bind(session.token_expiry)
        .bind(session.last_verified)
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        session_from_row(row)
    }

    async fn update_session(&self, session: &IdentitySession) -> StoreResult<()> {
        let flags = serde_json::to_value(&session.flags)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let result = sqlx::query(
            r#"
            UPDATE civic_auth_sessions
               SET status = $1, security_level = $2, risk_score = $3,
                   flags = $4, last_verified = $5
             WHERE id = $6
            "#,
        )
        .bind(session.status.as_str())
        .bind(session.security_level)
        .bind(session.risk_score)
        .bind(flags)
        .bind(session.last_verified)
        .bind(session.id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "session {} not found",
                session.id
            )));
        }
        Ok(())
    }

    async fn session_by_gatepass(
        &self,
        user_address: &str,
        gatepass: &str,
    ) -> StoreResult<Option<IdentitySession>> {
        let row = sqlx::query(
            "SELECT * FROM civic_auth_sessions WHERE user_address = $1 AND gatepass = $2",
        )
        .bind(user_address)
        .bind(gatepass)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(session_from_row).transpose()
    }

    async fn active_verified_session(
        &self,
        user_address: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<IdentitySession>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM civic_auth_sessions
             WHERE user_address = $1 AND status = 'verified' AND token_expiry > $2
             ORDER BY created_at DESC
             LIMIT 1
            "#,
        )
        .bind(user_address)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(session_from_row).transpose()
    }

    async fn latest_session(&self, user_address: &str) -> StoreResult<Option<IdentitySession>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM civic_auth_sessions
             WHERE user_address = $1
             ORDER BY created_at DESC
             LIMIT 1
            "#,
        )
        .bind(user_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(session_from_row).transpose()
    }

    async fn distinct_device_count(&self, user_address: &str) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT device_hash) FROM civic_auth_sessions WHERE user_address = $1",
        )
        .bind(user_address)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(n as u64)
    }

    async fn append_verification_log(&self, log: VerificationLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO civic_verification_logs
                (user_address, verification_type, success, device_info,
                 ip_address, geo_location, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&log.user_address)
        .bind(&log.verification_type)
        .bind(log.success)
        .bind(&log.device_info)
        .bind(&log.ip_address)
        .bind(&log.geo_location)
        .bind(log.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn verification_count_since(
        &self,
        user_address: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM civic_verification_logs
             WHERE user_address = $1 AND created_at > $2
            "#,
        )
        .bind(user_address)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(n as u64)
    }

    async fn last_geo_location(&self, user_address: &str) -> StoreResult<Option<String>> {
        sqlx::query_scalar(
            r#"
            SELECT geo_location FROM civic_verification_logs
             WHERE user_address = $1
             ORDER BY created_at DESC
             LIMIT 1
            "#,
        )
        .bind(user_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }
}

/// Mean minutes between events, from the first/last span and event count.
fn span_minutes(first: Option<DateTime<Utc>>, last: Option<DateTime<Utc>>, count: i64) -> f64 {
    match (first, last) {
        (Some(f), Some(l)) if count > 1 => {
            (l - f).num_seconds() as f64 / 60.0 / (count - 1) as f64
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_minutes() {
        let f = Utc::now();
        let l = f + Duration::minutes(30);
        assert_eq!(span_minutes(Some(f), Some(l), 4), 10.0);
        assert_eq!(span_minutes(Some(f), Some(l), 1), 0.0);
        assert_eq!(span_minutes(None, None, 5), 0.0);
    }

    #[test]
    fn test_upsert_sql_mentions_dominance_columns() {
        // The WHERE clause must compare both block_number and confirmed_at.
        assert!(UPSERT_SCAM_SQL.contains("EXCLUDED.block_number >= confirmed_scams.block_number"));
        assert!(UPSERT_SCAM_SQL.contains("EXCLUDED.confirmed_at >= confirmed_scams.confirmed_at"));
    }
}
