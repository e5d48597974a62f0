mod common;

use common::{pipeline, MockDatabase, Reply, ScriptedAgent, TENANT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spyne_nlq::db::DatabaseKind;
use spyne_nlq::execution_loop::PipelineRequest;

fn random_reply(rng: &mut StdRng) -> Reply {
    match rng.gen_range(0..6) {
        0 => Reply::Text("SELECT p.patient_id FROM patients p".to_string()),
        1 => Reply::Text("SELECT p.fullname FROM patients p".to_string()),
        2 => Reply::Text("SELECT * FROM patients WHERE full_name = 'nobody'".to_string()),
        3 => Reply::Text("Sorry, I am not sure which table holds that.".to_string()),
        4 => Reply::Text("```sql\nDELETE FROM patients\n```".to_string()),
        _ => Reply::Fail,
    }
}

#[tokio::test]
async fn test_every_acquired_connection_is_released() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for run in 0..200 {
        let kind = if rng.gen_bool(0.5) {
            DatabaseKind::Postgres
        } else {
            DatabaseKind::MySql
        };
        let db = if rng.gen_bool(0.15) {
            MockDatabase::refusing(kind)
        } else {
            MockDatabase::new(kind)
        };
        let max_attempts = rng.gen_range(1..=4);
        let replies = (0..max_attempts).map(|_| random_reply(&mut rng)).collect();
        let pipeline = pipeline(ScriptedAgent::new(replies), &db).with_max_attempts(max_attempts);

        let response = pipeline
            .run(&PipelineRequest::new("show me patients", TENANT))
            .await;

        assert_eq!(db.opened(), db.closed(), "run {} leaked a connection", run);
        assert_eq!(pipeline.connections().active(), 0, "run {}", run);
        assert!(response.attempt_count >= 1 && response.attempt_count <= max_attempts);
        if !response.success {
            assert_eq!(response.attempt_count, max_attempts, "run {}", run);
            assert!(response.diagnosis.is_some(), "run {}", run);
            assert!(response.rows.is_none());
        } else {
            assert!(response.rows.is_some());
            assert!(response.diagnosis.is_none());
        }
        assert!(db
            .executed()
            .iter()
            .all(|sql| !sql.to_uppercase().contains("DELETE")));
    }
}
