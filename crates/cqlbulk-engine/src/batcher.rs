//! The batching engine: groups bound statements by routing token into
//! bounded batches.
//!
//! One open bucket per routing token (or replica set), kept in arrival
//! order. A statement flushes its bucket when appending would exceed the
//! statement or byte ceiling; end-of-input flushes every bucket, oldest
//! first. Statements with no routing key, and statements whose own size
//! exceeds the byte ceiling, bypass grouping and dispatch as singletons.

use std::sync::Arc;

use cqlbulk_core::{
    Batch, BatchMode, BoundStatement, DriverSession, Result, Token, WriteUnit,
};
use cqlbulk_core::settings::BatchSettings;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a bucket is keyed by: the token itself, or the replica set owning
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BucketKey {
    Token(Token),
    Replicas(Vec<String>),
}

#[derive(Debug, Default)]
struct Bucket {
    token: Option<Token>,
    statements: Vec<BoundStatement>,
    bytes: usize,
}

pub struct BatchingEngine {
    mode: BatchMode,
    max_statements: usize,
    max_bytes: Option<usize>,
    session: Arc<dyn DriverSession>,
}

impl BatchingEngine {
    pub fn new(settings: &BatchSettings, session: Arc<dyn DriverSession>) -> Self {
        Self {
            mode: settings.mode,
            max_statements: settings.max_batch_statements,
            max_bytes: (settings.max_size_in_bytes > 0)
                .then_some(settings.max_size_in_bytes as usize),
            session,
        }
    }

    /// Drain `rx`, emitting write units into `tx`. Buckets are owned by
    /// this task alone; no cross-task mutation.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<BoundStatement>,
        tx: mpsc::Sender<WriteUnit>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut buckets: IndexMap<BucketKey, Bucket> = IndexMap::new();
        loop {
            let statement = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(s) => s,
                    None => break,
                },
            };
            if self.mode == BatchMode::Disabled {
                if tx.send(WriteUnit::Statement(statement)).await.is_err() {
                    return Ok(());
                }
                continue;
            }
            let Some(routing_key) = statement.routing_key() else {
                // No routing key: cannot be grouped.
                if tx.send(WriteUnit::Statement(statement)).await.is_err() {
                    return Ok(());
                }
                continue;
            };
            let size = statement.size_in_bytes();
            if self.max_bytes.is_some_and(|max| size > max) {
                // Oversized on its own: dispatch un-batched rather than
                // fail.
                debug!(size, "statement exceeds batch byte ceiling, emitting as singleton");
                if tx.send(WriteUnit::Statement(statement)).await.is_err() {
                    return Ok(());
                }
                continue;
            }
            let token = self.session.token_for(&routing_key);
            let key = match self.mode {
                BatchMode::PartitionKey => BucketKey::Token(token),
                BatchMode::ReplicaSet => BucketKey::Replicas(self.session.replicas_for(token)),
                BatchMode::Disabled => unreachable!(),
            };
            let bucket = buckets.entry(key.clone()).or_default();
            bucket.token.get_or_insert(token);
            let would_overflow = !bucket.statements.is_empty()
                && (bucket.statements.len() + 1 > self.max_statements
                    || self.max_bytes.is_some_and(|max| bucket.bytes + size > max));
            if would_overflow {
                let full = buckets.shift_remove(&key).unwrap();
                if tx.send(Self::seal(full)).await.is_err() {
                    return Ok(());
                }
                let fresh = buckets.entry(key).or_default();
                fresh.token.get_or_insert(token);
                fresh.statements.push(statement);
                fresh.bytes = size;
                continue;
            }
            bucket.bytes += size;
            bucket.statements.push(statement);
            if bucket.statements.len() >= self.max_statements {
                let full = buckets.shift_remove(&key).unwrap();
                if tx.send(Self::seal(full)).await.is_err() {
                    return Ok(());
                }
            }
        }
        // End of input: flush in arrival order, oldest bucket first.
        for (_, bucket) in std::mem::take(&mut buckets) {
            if tx.send(Self::seal(bucket)).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    fn seal(bucket: Bucket) -> WriteUnit {
        let Bucket { token, mut statements, .. } = bucket;
        if statements.len() == 1 {
            WriteUnit::Statement(statements.remove(0))
        } else {
            WriteUnit::Batch(Batch { token, statements })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqlbulk_core::testing::MockSession;
    use cqlbulk_core::{Consistency, CqlType, CqlValue, PreparedTemplate, VariableDef};

    fn template() -> Arc<PreparedTemplate> {
        Arc::new(PreparedTemplate::new(
            "INSERT INTO ks.t (k, v) VALUES (:k, :v)",
            vec![
                VariableDef { name: "k".into(), cql_type: CqlType::Text },
                VariableDef { name: "v".into(), cql_type: CqlType::Text },
            ],
            vec![0],
        ))
    }

    fn statement(key: &str, value: &str) -> BoundStatement {
        let mut s = BoundStatement::new(template(), Consistency::LocalOne);
        s.values[0] = CqlValue::Text(key.to_string());
        s.values[1] = CqlValue::Text(value.to_string());
        s
    }

    fn keyless(value: &str) -> BoundStatement {
        let t = Arc::new(PreparedTemplate::new(
            "INSERT INTO ks.t (v) VALUES (:v)",
            vec![VariableDef { name: "v".into(), cql_type: CqlType::Text }],
            vec![],
        ));
        let mut s = BoundStatement::new(t, Consistency::LocalOne);
        s.values[0] = CqlValue::Text(value.to_string());
        s
    }

    async fn run_batcher(
        settings: BatchSettings,
        statements: Vec<BoundStatement>,
    ) -> Vec<WriteUnit> {
        let engine = BatchingEngine::new(&settings, Arc::new(MockSession::new()));
        let (stmt_tx, stmt_rx) = mpsc::channel(64);
        let (unit_tx, mut unit_rx) = mpsc::channel(64);
        for s in statements {
            stmt_tx.send(s).await.unwrap();
        }
        drop(stmt_tx);
        engine.run(stmt_rx, unit_tx, CancellationToken::new()).await.unwrap();
        let mut units = vec![];
        while let Some(u) = unit_rx.recv().await {
            units.push(u);
        }
        units
    }

    #[tokio::test]
    async fn same_token_statements_group_in_order() {
        let units = run_batcher(
            BatchSettings::default(),
            vec![statement("a", "1"), statement("a", "2"), statement("a", "3")],
        )
        .await;
        assert_eq!(units.len(), 1);
        let WriteUnit::Batch(batch) = &units[0] else { panic!("expected a batch") };
        let values: Vec<_> = batch
            .statements
            .iter()
            .map(|s| s.values[1].clone())
            .collect();
        assert_eq!(
            values,
            vec![
                CqlValue::Text("1".into()),
                CqlValue::Text("2".into()),
                CqlValue::Text("3".into())
            ]
        );
    }

    #[tokio::test]
    async fn statement_ceiling_is_enforced() {
        let settings = BatchSettings { max_batch_statements: 2, ..Default::default() };
        let statements: Vec<_> = (0..5).map(|i| statement("a", &i.to_string())).collect();
        let units = run_batcher(settings, statements).await;
        // 5 statements, ceiling 2: batches of 2, 2, then a singleton.
        assert_eq!(units.iter().map(WriteUnit::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        // Every input appears exactly once, order preserved within the
        // token.
        let all: Vec<_> = units
            .iter()
            .flat_map(|u| u.statements().iter().map(|s| s.values[1].clone()))
            .collect();
        assert_eq!(
            all,
            (0..5).map(|i| CqlValue::Text(i.to_string())).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn byte_ceiling_flushes_buckets() {
        let settings = BatchSettings {
            max_batch_statements: 100,
            max_size_in_bytes: 10,
            ..Default::default()
        };
        // Each statement ~5 bytes of values ("a" + "1234").
        let units = run_batcher(
            settings,
            vec![statement("a", "1234"), statement("a", "5678"), statement("a", "9")],
        )
        .await;
        for unit in &units {
            match unit {
                WriteUnit::Batch(b) => assert!(b.size_in_bytes() <= 10),
                WriteUnit::Statement(_) => {}
            }
        }
        assert_eq!(units.iter().map(WriteUnit::len).sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn oversized_statement_passes_as_singleton() {
        let settings = BatchSettings {
            max_batch_statements: 100,
            max_size_in_bytes: 4,
            ..Default::default()
        };
        let units = run_batcher(settings, vec![statement("key", "very long value")]).await;
        assert_eq!(units.len(), 1);
        assert!(matches!(units[0], WriteUnit::Statement(_)));
    }

    #[tokio::test]
    async fn keyless_statements_bypass_grouping() {
        let units = run_batcher(
            BatchSettings::default(),
            vec![keyless("1"), keyless("2")],
        )
        .await;
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| matches!(u, WriteUnit::Statement(_))));
    }

    #[tokio::test]
    async fn disabled_mode_forwards_everything_unbatched() {
        let settings = BatchSettings { mode: BatchMode::Disabled, ..Default::default() };
        let units =
            run_batcher(settings, vec![statement("a", "1"), statement("a", "2")]).await;
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| matches!(u, WriteUnit::Statement(_))));
    }

    #[tokio::test]
    async fn distinct_tokens_never_mix() {
        let statements = vec![
            statement("alpha", "1"),
            statement("beta", "2"),
            statement("alpha", "3"),
            statement("beta", "4"),
        ];
        let units = run_batcher(BatchSettings::default(), statements).await;
        for unit in &units {
            if let WriteUnit::Batch(batch) = unit {
                let first_key = batch.statements[0].values[0].clone();
                assert!(batch.statements.iter().all(|s| s.values[0] == first_key));
            }
        }
        assert_eq!(units.iter().map(WriteUnit::len).sum::<usize>(), 4);
    }
}
