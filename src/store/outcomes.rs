use rusqlite::{ErrorCode, params};

use crate::domain::{OutcomeResult, RequestOutcome, TestId};
use crate::error::StoreError;

use super::{Database, to_i64, to_u64};

/// Append-only outcome log of one test.
///
/// The primary key `(test_id, request_id)` makes every append exactly-once:
/// a second write for the same request is rejected, never merged.
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    db: Database,
    test_id: TestId,
}

struct RawOutcome {
    request_id: i64,
    scheduled_at_us: i64,
    sent_at_us: i64,
    first_token_at_us: Option<i64>,
    token_times: String,
    completed_at_us: i64,
    result: String,
    token_count: i64,
    status_code: Option<i64>,
    error: Option<String>,
}

impl OutcomeRecorder {
    #[must_use]
    pub const fn new(db: Database, test_id: TestId) -> Self {
        Self { db, test_id }
    }

    /// Persists one outcome; the row is committed when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateOutcome`] when the request was already
    /// recorded, or a SQLite error.
    pub async fn append(&self, outcome: &RequestOutcome) -> Result<(), StoreError> {
        let token_times = serde_json::to_string(&outcome.token_arrival_us).map_err(|source| {
            StoreError::Encode {
                context: "token arrival times",
                source,
            }
        })?;
        let test_id = self.test_id.as_str().to_owned();
        let row = (
            to_i64(outcome.request_id),
            to_i64(outcome.scheduled_at_us),
            to_i64(outcome.sent_at_us),
            outcome.first_token_at_us.map(to_i64),
            token_times,
            to_i64(outcome.completed_at_us),
            outcome.result.as_str(),
            to_i64(outcome.token_count),
            outcome.status_code.map(i64::from),
            outcome.error.clone(),
        );

        let inserted = self
            .db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO outcomes (test_id, request_id, scheduled_at_us, sent_at_us,
                        first_token_at_us, token_times, completed_at_us, result, token_count,
                        status_code, error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        test_id, row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8,
                        row.9
                    ],
                )?;
                Ok(())
            })
            .await;

        match inserted {
            Ok(()) => Ok(()),
            Err(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, _)))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateOutcome {
                    test_id: self.test_id.as_str().to_owned(),
                    request_id: outcome.request_id,
                })
            }
            Err(source) => Err(StoreError::Sqlite {
                context: "append outcome",
                source,
            }),
        }
    }

    /// Every outcome of the test, ordered by request id.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row cannot be decoded.
    pub async fn read_all(&self) -> Result<Vec<RequestOutcome>, StoreError> {
        let test_id = self.test_id.as_str().to_owned();
        let rows = self
            .db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT request_id, scheduled_at_us, sent_at_us, first_token_at_us,
                        token_times, completed_at_us, result, token_count, status_code, error
                     FROM outcomes WHERE test_id = ?1 ORDER BY request_id",
                )?;
                let rows = stmt
                    .query_map(params![test_id], |row| {
                        Ok(RawOutcome {
                            request_id: row.get(0)?,
                            scheduled_at_us: row.get(1)?,
                            sent_at_us: row.get(2)?,
                            first_token_at_us: row.get(3)?,
                            token_times: row.get(4)?,
                            completed_at_us: row.get(5)?,
                            result: row.get(6)?,
                            token_count: row.get(7)?,
                            status_code: row.get(8)?,
                            error: row.get(9)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|source| StoreError::Sqlite {
                context: "read outcomes",
                source,
            })?;

        rows.into_iter().map(decode).collect()
    }
}

fn decode(raw: RawOutcome) -> Result<RequestOutcome, StoreError> {
    let result = OutcomeResult::parse(&raw.result).ok_or_else(|| StoreError::Corrupt {
        context: "outcome",
        detail: format!("unknown result '{}'", raw.result),
    })?;
    let token_arrival_us: Vec<u64> =
        serde_json::from_str(&raw.token_times).map_err(|err| StoreError::Corrupt {
            context: "outcome",
            detail: format!("token times: {}", err),
        })?;
    let status_code = match raw.status_code {
        Some(code) => Some(u16::try_from(code).map_err(|_overflow| StoreError::Corrupt {
            context: "outcome",
            detail: format!("status code {}", code),
        })?),
        None => None,
    };
    Ok(RequestOutcome {
        request_id: to_u64(raw.request_id),
        scheduled_at_us: to_u64(raw.scheduled_at_us),
        sent_at_us: to_u64(raw.sent_at_us),
        first_token_at_us: raw.first_token_at_us.map(to_u64),
        token_arrival_us,
        completed_at_us: to_u64(raw.completed_at_us),
        result,
        token_count: to_u64(raw.token_count),
        status_code,
        error: raw.error,
    })
}
