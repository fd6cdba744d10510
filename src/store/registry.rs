use rusqlite::params;

use crate::domain::{TestId, TestState, TestStatus};
use crate::error::StoreError;

use super::{Database, to_i64, to_u64};

/// A registry row: the registration payload as submitted plus its state.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTest {
    pub id: TestId,
    pub registration: serde_json::Value,
    pub state: TestState,
}

type RawTest = (
    String,
    String,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    Option<String>,
    i64,
    Option<String>,
);

impl Database {
    /// Inserts a newly registered test.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload cannot be encoded or the insert fails.
    pub async fn insert_test(
        &self,
        id: &TestId,
        registration: &serde_json::Value,
        state: &TestState,
    ) -> Result<(), StoreError> {
        let registration =
            serde_json::to_string(registration).map_err(|source| StoreError::Encode {
                context: "registration",
                source,
            })?;
        let id = id.as_str().to_owned();
        let state = state.clone();
        self.connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tests (id, registration, status, registered_at, started_at,
                        ended_at, error_info, rejected_requests, workload_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        id,
                        registration,
                        state.status.as_str(),
                        to_i64(state.registered_at),
                        state.started_at.map(to_i64),
                        state.ended_at.map(to_i64),
                        state.error,
                        to_i64(state.rejected_requests),
                        state.workload_hash
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|source| StoreError::Sqlite {
                context: "insert test",
                source,
            })
    }

    /// Overwrites the lifecycle columns of a test.
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub async fn update_test_state(&self, id: &TestId, state: &TestState) -> Result<(), StoreError> {
        let id = id.as_str().to_owned();
        let state = state.clone();
        self.connection()
            .call(move |conn| {
                conn.execute(
                    "UPDATE tests SET status = ?2, started_at = ?3, ended_at = ?4,
                        error_info = ?5, rejected_requests = ?6, workload_hash = ?7
                     WHERE id = ?1",
                    params![
                        id,
                        state.status.as_str(),
                        state.started_at.map(to_i64),
                        state.ended_at.map(to_i64),
                        state.error,
                        to_i64(state.rejected_requests),
                        state.workload_hash
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|source| StoreError::Sqlite {
                context: "update test state",
                source,
            })
    }

    /// Marks tests left RUNNING by a previous process as FAILED.
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub async fn fail_interrupted_tests(&self, ended_at: u64) -> Result<usize, StoreError> {
        self.connection()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE tests SET status = 'FAILED', ended_at = ?1,
                        error_info = 'interrupted'
                     WHERE status = 'RUNNING'",
                    params![to_i64(ended_at)],
                )?;
                Ok(changed)
            })
            .await
            .map_err(|source| StoreError::Sqlite {
                context: "fail interrupted tests",
                source,
            })
    }

    /// Every registered test, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails or a row cannot be decoded.
    pub async fn load_tests(&self) -> Result<Vec<StoredTest>, StoreError> {
        let rows: Vec<RawTest> = self
            .connection()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, registration, status, registered_at, started_at, ended_at,
                        error_info, rejected_requests, workload_hash
                     FROM tests ORDER BY registered_at, id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|source| StoreError::Sqlite {
                context: "load tests",
                source,
            })?;
        rows.into_iter().map(decode).collect()
    }

    /// Removes a test and its outcome log in one transaction. Returns the
    /// number of outcomes removed, or `None` when the test was unknown.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails.
    pub async fn delete_test(&self, id: &TestId) -> Result<Option<u64>, StoreError> {
        let id = id.as_str().to_owned();
        let removed = self
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let outcomes = tx.execute("DELETE FROM outcomes WHERE test_id = ?1", params![id])?;
                let tests = tx.execute("DELETE FROM tests WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok((tests > 0).then_some(outcomes))
            })
            .await
            .map_err(|source| StoreError::Sqlite {
                context: "delete test",
                source,
            })?;
        Ok(removed.map(|count| u64::try_from(count).unwrap_or(u64::MAX)))
    }
}

fn decode(raw: RawTest) -> Result<StoredTest, StoreError> {
    let (id, registration, status, registered_at, started_at, ended_at, error, rejected, hash) =
        raw;
    let status = TestStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
        context: "test",
        detail: format!("unknown status '{}' for '{}'", status, id),
    })?;
    let registration = serde_json::from_str(&registration).map_err(|err| StoreError::Corrupt {
        context: "test",
        detail: format!("registration of '{}': {}", id, err),
    })?;
    Ok(StoredTest {
        id: TestId::from(id),
        registration,
        state: TestState {
            status,
            registered_at: to_u64(registered_at),
            started_at: started_at.map(to_u64),
            ended_at: ended_at.map(to_u64),
            error,
            stop_requested: false,
            rejected_requests: to_u64(rejected),
            workload_hash: hash,
        },
    })
}
