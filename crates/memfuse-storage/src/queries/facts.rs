// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! M2 structured fact operations.
//!
//! Exact duplicates collapse on the `(session_id, fact_type, content)`
//! unique constraint; the extractor layers near-duplicate and contradiction
//! gates on top using the embeddings returned by [`session_embeddings`].
//! Keyword recall goes through the FTS5 shadow table with BM25 relevance
//! normalized into (0, 1).

use memfuse_core::types::{blob_to_vec, cosine_similarity, vec_to_blob, Fact, FactType};
use memfuse_core::MemfuseError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::ScoredFact;

fn fact_to_params(fact: &Fact) -> Result<(String, String, Vec<u8>), rusqlite::Error> {
    let relations = serde_json::to_string(&fact.relations)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let metadata = serde_json::to_string(&fact.metadata)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    Ok((relations, metadata, vec_to_blob(&fact.embedding)))
}

fn exec_insert_fact(conn: &rusqlite::Connection, fact: &Fact) -> Result<bool, rusqlite::Error> {
    let (relations, metadata, blob) = fact_to_params(fact)?;
    let changed = conn.execute(
        "INSERT OR IGNORE INTO structured_memory
         (fact_id, session_id, source_round_id, fact_type, content, relations, metadata, embedding, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            fact.fact_id,
            fact.session_id,
            fact.source_round_id,
            fact.fact_type.as_str(),
            fact.content,
            relations,
            metadata,
            blob,
            fact.created_at,
        ],
    )?;
    Ok(changed > 0)
}

/// Insert a single fact. Returns `false` when the exact-duplicate
/// constraint absorbed it.
pub async fn insert_fact(db: &Database, fact: &Fact) -> Result<bool, MemfuseError> {
    let fact = fact.clone();
    db.connection()
        .call(move |conn| Ok(exec_insert_fact(conn, &fact)?))
        .await
        .map_err(map_tr_err)
}

/// Insert a batch of facts in a single transaction. Returns the number of
/// rows actually written (duplicates absorbed silently).
pub async fn insert_facts_tx(db: &Database, facts: &[Fact]) -> Result<usize, MemfuseError> {
    let facts = facts.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            for fact in &facts {
                if exec_insert_fact(&tx, fact)? {
                    inserted += 1;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(map_tr_err)
}

/// Whether an identical `(session, type, content)` fact already exists.
pub async fn exists_exact(
    db: &Database,
    session_id: &str,
    fact_type: FactType,
    content: &str,
) -> Result<bool, MemfuseError> {
    let session_id = session_id.to_string();
    let content = content.to_string();
    let type_str = fact_type.as_str();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM structured_memory
                 WHERE session_id = ?1 AND fact_type = ?2 AND content = ?3",
                params![session_id, type_str, content],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// All fact embeddings for a session (lightweight, no content).
pub async fn session_embeddings(
    db: &Database,
    session_id: &str,
) -> Result<Vec<(String, FactType, Vec<f32>)>, MemfuseError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT fact_id, fact_type, embedding FROM structured_memory WHERE session_id = ?1",
            )?;
            let results = stmt
                .query_map(params![session_id], |row| {
                    let fact_type: String = row.get(1)?;
                    let blob: Vec<u8> = row.get(2)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        FactType::from_str_value(&fact_type),
                        blob_to_vec(&blob),
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(results)
        })
        .await
        .map_err(map_tr_err)
}

/// Exact cosine scan over a session's facts.
pub async fn search_similar(
    db: &Database,
    session_id: &str,
    query_embedding: &[f32],
    top_k: usize,
) -> Result<Vec<ScoredFact>, MemfuseError> {
    let session_id = session_id.to_string();
    let query = query_embedding.to_vec();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT fact_id, fact_type, content, embedding, created_at
                 FROM structured_memory WHERE session_id = ?1",
            )?;
            let rows: Vec<(ScoredFact, Vec<u8>)> = stmt
                .query_map(params![session_id], |row| {
                    let fact_type: String = row.get(1)?;
                    Ok((
                        ScoredFact {
                            fact_id: row.get(0)?,
                            fact_type: FactType::from_str_value(&fact_type),
                            content: row.get(2)?,
                            score: 0.0,
                            created_at: row.get(4)?,
                        },
                        row.get(3)?,
                    ))
                })?
                .collect::<Result<_, _>>()?;

            let mut scored: Vec<ScoredFact> = rows
                .into_iter()
                .filter_map(|(mut fact, blob)| {
                    let embedding = blob_to_vec(&blob);
                    if embedding.len() != query.len() {
                        return None;
                    }
                    fact.score = cosine_similarity(&query, &embedding);
                    Some(fact)
                })
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
            scored.truncate(top_k);
            Ok(scored)
        })
        .await
        .map_err(map_tr_err)
}

/// Keyword search over a session's facts via FTS5.
///
/// `terms` are OR-joined as quoted phrases. BM25 output (more negative =
/// more relevant) is normalized to `rel / (1 + rel)` so fused scoring can
/// compare it against cosine similarity.
pub async fn search_keyword(
    db: &Database,
    session_id: &str,
    terms: &[String],
    top_k: usize,
) -> Result<Vec<ScoredFact>, MemfuseError> {
    if terms.is_empty() {
        return Ok(vec![]);
    }
    let session_id = session_id.to_string();
    let match_expr = terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ");
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT m.fact_id, m.fact_type, m.content, bm25(structured_memory_fts) AS score, m.created_at
                 FROM structured_memory_fts
                 JOIN structured_memory m ON m.rowid = structured_memory_fts.rowid
                 WHERE structured_memory_fts MATCH ?1 AND m.session_id = ?2
                 ORDER BY bm25(structured_memory_fts)
                 LIMIT ?3",
            )?;
            let results = stmt
                .query_map(params![match_expr, session_id, top_k as i64], |row| {
                    let fact_type: String = row.get(1)?;
                    let bm25: f64 = row.get(3)?;
                    let relevance = (-bm25).max(0.0) as f32;
                    Ok(ScoredFact {
                        fact_id: row.get(0)?,
                        fact_type: FactType::from_str_value(&fact_type),
                        content: row.get(2)?,
                        score: relevance / (1.0 + relevance),
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(results)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a full fact row by id.
pub async fn get_fact(db: &Database, fact_id: &str) -> Result<Option<Fact>, MemfuseError> {
    let fact_id = fact_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT fact_id, session_id, source_round_id, fact_type, content,
                        relations, metadata, embedding, created_at
                 FROM structured_memory WHERE fact_id = ?1",
            )?;
            let fact = stmt
                .query_row(params![fact_id], |row| {
                    let fact_type: String = row.get(3)?;
                    let relations: String = row.get(5)?;
                    let metadata: String = row.get(6)?;
                    let blob: Vec<u8> = row.get(7)?;
                    Ok(Fact {
                        fact_id: row.get(0)?,
                        session_id: row.get(1)?,
                        source_round_id: row.get(2)?,
                        fact_type: FactType::from_str_value(&fact_type),
                        content: row.get(4)?,
                        relations: serde_json::from_str(&relations).unwrap_or_default(),
                        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                        embedding: blob_to_vec(&blob),
                        created_at: row.get(8)?,
                    })
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(e),
                })?;
            Ok(fact)
        })
        .await
        .map_err(map_tr_err)
}

/// Count facts in a session with exactly this content (test observability).
pub async fn count_with_content(
    db: &Database,
    session_id: &str,
    content: &str,
) -> Result<i64, MemfuseError> {
    let session_id = session_id.to_string();
    let content = content.to_string();
    db.connection()
        .call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM structured_memory WHERE session_id = ?1 AND content = ?2",
                params![session_id, content],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_iso;
    use crate::queries::sessions::get_or_create_session;
    use memfuse_core::types::{l2_normalize, FactRelations};
    use uuid::Uuid;

    async fn setup() -> (Database, String) {
        let db = Database::open_in_memory().await.unwrap();
        let session = get_or_create_session(&db, "sess", None).await.unwrap();
        (db, session.id)
    }

    fn make_fact(session_id: &str, fact_type: FactType, content: &str, emb: Vec<f32>) -> Fact {
        Fact {
            fact_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            source_round_id: 1,
            fact_type,
            content: content.to_string(),
            relations: FactRelations::default(),
            metadata: serde_json::Map::new(),
            embedding: emb,
            created_at: now_iso(),
        }
    }

    #[tokio::test]
    async fn exact_duplicates_collapse() {
        let (db, sid) = setup().await;
        let fact = make_fact(&sid, FactType::Decision, "Ship on Monday", vec![0.5; 4]);
        assert!(insert_fact(&db, &fact).await.unwrap());

        let dup = Fact {
            fact_id: Uuid::new_v4().to_string(),
            ..fact.clone()
        };
        assert!(!insert_fact(&db, &dup).await.unwrap());
        assert_eq!(
            count_with_content(&db, &sid, "Ship on Monday").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn same_content_different_type_coexists() {
        let (db, sid) = setup().await;
        let a = make_fact(&sid, FactType::Fact, "The sky is blue", vec![0.5; 4]);
        let b = make_fact(&sid, FactType::Assumption, "The sky is blue", vec![0.5; 4]);
        assert!(insert_fact(&db, &a).await.unwrap());
        assert!(insert_fact(&db, &b).await.unwrap());
        assert_eq!(
            count_with_content(&db, &sid, "The sky is blue").await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn batch_insert_reports_inserted_count() {
        let (db, sid) = setup().await;
        let facts = vec![
            make_fact(&sid, FactType::Fact, "one", vec![0.1; 4]),
            make_fact(&sid, FactType::Fact, "two", vec![0.2; 4]),
            make_fact(&sid, FactType::Fact, "one", vec![0.1; 4]),
        ];
        let inserted = insert_facts_tx(&db, &facts).await.unwrap();
        assert_eq!(inserted, 2, "duplicate inside the batch must be absorbed");
    }

    #[tokio::test]
    async fn similarity_scan_orders_and_caps() {
        let (db, sid) = setup().await;
        let close = l2_normalize(&[1.0, 0.1, 0.0]);
        let far = l2_normalize(&[0.0, 1.0, 0.0]);
        insert_fact(&db, &make_fact(&sid, FactType::Fact, "close", close))
            .await
            .unwrap();
        insert_fact(&db, &make_fact(&sid, FactType::Fact, "far", far))
            .await
            .unwrap();

        let query = l2_normalize(&[1.0, 0.0, 0.0]);
        let results = search_similar(&db, &sid, &query, 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "close");
    }

    #[tokio::test]
    async fn keyword_search_finds_and_normalizes() {
        let (db, sid) = setup().await;
        insert_fact(
            &db,
            &make_fact(
                &sid,
                FactType::Decision,
                "We decided to ship on Monday",
                vec![0.5; 4],
            ),
        )
        .await
        .unwrap();

        let terms = vec!["ship".to_string(), "monday".to_string()];
        let results = search_keyword(&db, &sid, &terms, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score > 0.0 && results[0].score < 1.0);

        let miss = search_keyword(&db, &sid, &["quantum".to_string()], 10)
            .await
            .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn keyword_search_empty_terms_is_empty() {
        let (db, sid) = setup().await;
        assert!(search_keyword(&db, &sid, &[], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fact_roundtrip_preserves_relations_and_metadata() {
        let (db, sid) = setup().await;
        let mut fact = make_fact(&sid, FactType::Decision, "Ship Tuesday", vec![0.5; 4]);
        fact.relations = FactRelations {
            based_on: vec!["f0".into()],
            contradicts: Some("f9".into()),
            supports: vec![],
        };
        fact.metadata
            .insert("confidence".into(), serde_json::json!(0.8));
        insert_fact(&db, &fact).await.unwrap();

        let back = get_fact(&db, &fact.fact_id).await.unwrap().unwrap();
        assert_eq!(back.relations.contradicts.as_deref(), Some("f9"));
        assert_eq!(back.relations.based_on, vec!["f0".to_string()]);
        assert!((back.confidence() - 0.8).abs() < f64::EPSILON);
        assert_eq!(back.embedding.len(), 4);
    }

    #[tokio::test]
    async fn session_embeddings_typed() {
        let (db, sid) = setup().await;
        insert_fact(&db, &make_fact(&sid, FactType::Decision, "d", vec![0.5; 4]))
            .await
            .unwrap();
        insert_fact(&db, &make_fact(&sid, FactType::Fact, "f", vec![0.5; 4]))
            .await
            .unwrap();

        let embeddings = session_embeddings(&db, &sid).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings
            .iter()
            .any(|(_, t, _)| *t == FactType::Decision));
    }
}
