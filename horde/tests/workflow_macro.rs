use std::time::Duration;

use horde::{
    CheckAggregator, IterationOutcome, Profile, RampingExecutor, RunStatus, Scenario, Stage,
    VuContext, WorkflowError, macros::workflow, run_iteration,
};
use tokio_util::sync::CancellationToken;

#[workflow]
async fn crud(ctx: VuContext) -> Result<(), WorkflowError> {
    ctx.declare_check("deleted");
    ctx.step("create", async { Ok::<_, std::io::Error>(()) }).await?;
    ctx.check("created", true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.step("delete", async {
        Err::<(), _>(std::io::Error::other("gone"))
    })
    .await?;
    ctx.check("deleted", true);
    Ok(())
}

#[tokio::test]
async fn macro_workflow_runs_a_single_iteration() {
    let aggregator = CheckAggregator::new();
    let ctx = VuContext::new(0, 0, aggregator.recorder(), CancellationToken::new());

    match run_iteration(&crud, ctx).await {
        IterationOutcome::Failed { step, error } => {
            assert_eq!(step.as_deref(), Some("delete"));
            assert!(error.contains("gone"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn macro_workflow_under_load() {
    let executor = RampingExecutor::builder()
        .profile(
            Profile::new(vec![
                Stage::new(Duration::from_millis(500), 3),
                Stage::new(Duration::from_millis(500), 3),
            ])
            .unwrap(),
        )
        .tick(Duration::from_millis(50))
        .build();

    let report = Scenario::new("crud", crud).run(&executor).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.total_iterations > 0);
    // Iterations caught between the two steps at the deadline are interrupted.
    assert_eq!(
        report.failed_iterations + report.interrupted_iterations,
        report.total_iterations
    );
    assert!(report.interrupted_iterations <= 3);
    assert_eq!(report.errors["delete"], report.failed_iterations);

    let created = report.summary("created").unwrap();
    assert_eq!(created.pass_count, report.total_iterations);

    // Declared but never reached.
    let deleted = report.summary("deleted").unwrap();
    assert_eq!(deleted.total(), 0);
    assert_eq!(deleted.pass_rate(), None);
}
