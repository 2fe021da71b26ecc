mod support;

use dashql::{
    catalog::Operator,
    drilldown::DrilldownPhase,
    error::DashboardError,
    models::{Chart, ChartKind, Dashboard, DashboardContext, FilterRule},
    pipeline::ChartFetchState,
    SessionCommand, SessionEvent,
};
use serde_json::json;
use std::time::Duration;
use support::{count, engine, rows, ScriptedExecutor, StaticColumns};

const COLUMNS: &[(&str, Option<&str>)] = &[
    ("STATUS", Some("VARCHAR2")),
    ("VL_MENSALIDADE", Some("VARCHAR2")),
    ("CD_OPERADORA", Some("NUMBER")),
    ("DT_ADESAO", None),
];

fn dashboard() -> Dashboard {
    let mut dashboard = Dashboard::new("Carteira", DashboardContext::new("VW_CONTRATOS"));
    dashboard
        .charts
        .push(Chart::new(ChartKind::Donut, "Status", "STATUS").with_source("VW_CONTRATOS"));
    dashboard
}

fn scripted() -> std::sync::Arc<ScriptedExecutor> {
    let executor = ScriptedExecutor::new();
    executor.respond("SELECT COUNT(*)", count(3));
    let mut buckets: Vec<Vec<serde_json::Value>> = (0..22)
        .map(|i| vec![json!(format!("S{i:02}")), json!(100 - i)])
        .collect();
    buckets.push(vec![serde_json::Value::Null, json!(1)]);
    executor.respond("GROUP BY STATUS", rows(&["NAME", "VALUE"], buckets));
    executor.respond("SELECT * FROM VW_CONTRATOS", rows(&["STATUS"], vec![vec![json!("S21")]]));
    executor
}

#[tokio::test(start_paused = true)]
async fn filters_are_validated_against_inferred_column_types() {
    let columns = StaticColumns::new(COLUMNS);
    let state = engine(scripted(), columns.clone());
    let (mut session, mut events) = state.open_session(dashboard());

    let err = session
        .dispatch(SessionCommand::SetUserFilters(vec![FilterRule::new(
            "VL_MENSALIDADE",
            Operator::Contains,
            "10",
        )]))
        .await
        .unwrap_err();
    assert!(matches!(err, DashboardError::Validation(_)));
    assert!(matches!(events.try_recv(), Ok(SessionEvent::Error { .. })));
    assert!(session.context().user_filters.is_empty());

    let err = session
        .set_user_filters(vec![FilterRule::new("NOPE", Operator::Equals, "1")])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("NOPE"));

    let handles = session
        .set_user_filters(vec![
            FilterRule::new("VL_MENSALIDADE", Operator::GreaterThan, "100"),
            FilterRule::new("CD_OPERADORA", Operator::StartsWith, "1"),
            FilterRule::new("DT_ADESAO", Operator::After, ""),
        ])
        .await
        .unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(columns.requested_tables(), vec!["VW_CONTRATOS"]);

    let operators = session.operators_for_column("dt_adesao").await.unwrap();
    assert!(operators.iter().any(|def| def.operator == Operator::After));
}

#[tokio::test(start_paused = true)]
async fn source_change_invalidates_column_cache() {
    let columns = StaticColumns::new(COLUMNS);
    let state = engine(scripted(), columns.clone());
    let (mut session, _events) = state.open_session(dashboard());

    session.operators_for_column("STATUS").await.unwrap();
    session.operators_for_column("STATUS").await.unwrap();
    assert_eq!(columns.requested_tables().len(), 1);

    session
        .dispatch(SessionCommand::SetSourceTable("TB_CONTRATOS".into()))
        .await
        .unwrap();
    assert!(session.column_cache().cached("VW_CONTRATOS").is_none());

    session.operators_for_column("STATUS").await.unwrap();
    assert_eq!(columns.requested_tables(), vec!["VW_CONTRATOS", "TB_CONTRATOS"]);
}

#[tokio::test(start_paused = true)]
async fn drilldown_on_grouped_chart_uses_rendered_siblings() {
    let executor = scripted();
    let state = engine(executor.clone(), StaticColumns::new(COLUMNS));
    let (mut session, mut events) = state.open_session(dashboard());
    let chart_id = session.dashboard().charts[0].id;

    for handle in session.set_scope("12") {
        handle.await.unwrap();
    }
    let ChartFetchState::Loaded(series) = session.pipeline(chart_id).unwrap().state() else {
        panic!("chart should load");
    };
    assert_eq!(series.len(), 21);

    session
        .dispatch(SessionCommand::OpenDrilldown {
            chart_id,
            value: Some("Others".into()),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let drill = session.drilldown().snapshot();
    assert_eq!(drill.phase, DrilldownPhase::Loaded);
    assert_eq!(drill.total_count, 3);
    assert!(drill
        .base_sql
        .starts_with("SELECT * FROM VW_CONTRATOS WHERE STATUS NOT IN ('S00','S01'"));
    assert!(drill
        .base_sql
        .ends_with("AND STATUS IS NOT NULL AND CD_EMPRESA_PLANO IN ('12')"));

    session
        .dispatch(SessionCommand::SortDrilldown("STATUS".into()))
        .await
        .unwrap();
    session.dispatch(SessionCommand::CloseDrilldown).await.unwrap();
    assert!(!session.drilldown().snapshot().active);

    let mut saw_chart = false;
    let mut saw_drill = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::ChartStateChanged { chart_id: id } => saw_chart |= id == chart_id,
            SessionEvent::DrilldownChanged => saw_drill = true,
            SessionEvent::Error { message } => panic!("unexpected error: {message}"),
        }
    }
    assert!(saw_chart && saw_drill);
}

#[tokio::test(start_paused = true)]
async fn unknown_chart_commands_report_errors() {
    let state = engine(scripted(), StaticColumns::new(COLUMNS));
    let (mut session, mut events) = state.open_session(dashboard());

    let err = session
        .dispatch(SessionCommand::RetryChart(uuid::Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, DashboardError::Validation(_)));
    assert!(matches!(events.try_recv(), Ok(SessionEvent::Error { .. })));

    let chart_id = session.dashboard().charts[0].id;
    session
        .dispatch(SessionCommand::SetChartTimeout {
            chart_id,
            seconds: 30,
        })
        .await
        .unwrap();
    assert_eq!(
        session.pipeline(chart_id).unwrap().timeout(),
        Duration::from_secs(30)
    );
}
