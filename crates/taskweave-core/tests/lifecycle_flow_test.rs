// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end task flows through the runtime: descriptor, barrier, monitor
//! and telemetry together.

mod common;

use common::*;
use taskweave_core::barrier::{BarrierOutcome, DataOperation, FailureReport};
use taskweave_core::catalog::CoreId;
use taskweave_core::monitor::{ExecutionOutcome, GeneratedValue, LifecycleEvent, TaskState};
use taskweave_core::parameter::{DataType, Direction, Parameter};
use taskweave_core::profile::Profile;
use taskweave_core::task::TaskOptions;
use taskweave_core::telemetry::CoreGauge;

fn matrix_params() -> Vec<Parameter> {
    vec![
        Parameter::input(DataType::File),
        Parameter::input(DataType::File),
        Parameter::output(DataType::Object),
    ]
}

fn pending(ctx: &TestContext, core_id: CoreId) -> Option<i64> {
    ctx.runtime.telemetry().gauge(core_id, CoreGauge::PendingTasks)
}

#[tokio::test]
async fn test_successful_task_flow() {
    let ctx = TestContext::new().await;
    let descriptor = ctx
        .runtime
        .describe_method("app.Matrix", "multiply", TaskOptions::default(), false, matrix_params())
        .unwrap();
    assert!(descriptor.has_return_value());
    let core_id = descriptor.core_id();
    let before = pending(&ctx, core_id);

    let task = ctx.runtime.new_task(&descriptor);
    task.handle(LifecycleEvent::Creation).unwrap();
    task.handle(LifecycleEvent::AccessesProcessed).unwrap();
    task.handle(LifecycleEvent::Schedule).unwrap();

    // Both inputs travel before the job is submitted
    let barrier = ctx.runtime.submit_on_ready(&task);
    let inputs = [DataOperation::new("d1v1"), DataOperation::new("d2v1")];
    for _ in &inputs {
        barrier.add_operation().unwrap();
    }
    barrier.enable().unwrap();
    barrier.notify_completion(&inputs[0]).unwrap();
    assert_eq!(task.state(), TaskState::Scheduled);
    assert_eq!(barrier.notify_completion(&inputs[1]).unwrap(), Some(BarrierOutcome::Ready));
    assert_eq!(pending(&ctx, core_id), Some(1));

    task.handle(LifecycleEvent::DataReception).unwrap();
    task.handle(LifecycleEvent::ValueGenerated {
        param_index: 2,
        value: GeneratedValue::new(DataType::Object, "worker1:/tmp/d3v1", "d3v1"),
    })
    .unwrap();
    task.handle(LifecycleEvent::SuccessfulExecution {
        profile: Some(Profile::from_stats(1, 120, 120, 120)),
    })
    .unwrap();
    task.handle(LifecycleEvent::Completion).unwrap();

    assert_eq!(pending(&ctx, core_id), before);
    let telemetry = ctx.runtime.telemetry();
    assert_eq!(telemetry.gauge(core_id, CoreGauge::ExecutedTasks), Some(1));
    assert_eq!(telemetry.gauge(core_id, CoreGauge::MaxTime), Some(120));

    let records = ctx.finish().await;
    let generated: Vec<_> = records.iter().filter_map(|r| r.value.clone()).collect();
    assert_eq!(
        generated,
        vec![(2, GeneratedValue::new(DataType::Object, "worker1:/tmp/d3v1", "d3v1"))]
    );
    assert_eq!(records[5].event, "value_generated");

    let states: Vec<TaskState> = records.into_iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![
            TaskState::Created,
            TaskState::AccessesProcessed,
            TaskState::Scheduled,
            TaskState::Submitted,
            TaskState::DataReceived,
            TaskState::DataReceived,
            TaskState::Executed(ExecutionOutcome::Successful),
            TaskState::Completed,
        ]
    );
}

#[tokio::test]
async fn test_failed_transfers_fail_the_attempt() {
    let ctx = TestContext::new().await;
    let descriptor = ctx
        .runtime
        .describe_method("app.Matrix", "multiply", TaskOptions::default(), false, matrix_params())
        .unwrap();
    let task = ctx.runtime.new_task(&descriptor);
    task.handle(LifecycleEvent::Creation).unwrap();
    task.handle(LifecycleEvent::Schedule).unwrap();

    let barrier = ctx.runtime.submit_on_ready(&task);
    let inputs = [DataOperation::new("d1v1"), DataOperation::new("d2v1")];
    for _ in &inputs {
        barrier.add_operation().unwrap();
    }
    barrier.enable().unwrap();
    let cause = TransferError("disk full".to_string());
    barrier.notify_failure(&inputs[0], &cause).unwrap();
    let outcome = barrier.notify_completion(&inputs[1]).unwrap();

    assert_eq!(
        outcome,
        Some(BarrierOutcome::Failed(FailureReport { errors: 1, total: 2 }))
    );
    assert_eq!(task.state(), TaskState::Executed(ExecutionOutcome::Failed));
    assert_eq!(pending(&ctx, descriptor.core_id()), Some(0));

    task.handle(LifecycleEvent::Failure).unwrap();
    ctx.finish().await;
}

#[tokio::test]
async fn test_retry_after_error_keeps_gauge_balanced() {
    let ctx = TestContext::new().await;
    let descriptor = ctx
        .runtime
        .describe_service(
            "http://calc.example",
            "Calculator",
            "CalculatorPort",
            "add",
            false,
            false,
            vec![Parameter::input(DataType::Int), Parameter::new(Direction::Out, DataType::Object)],
        )
        .unwrap();
    let core_id = descriptor.core_id();
    let task = ctx.runtime.new_task(&descriptor);

    task.handle(LifecycleEvent::Creation).unwrap();
    task.handle(LifecycleEvent::Schedule).unwrap();
    task.handle(LifecycleEvent::Submission).unwrap();
    task.handle(LifecycleEvent::ErrorExecution).unwrap();
    assert_eq!(pending(&ctx, core_id), Some(0));

    task.handle(LifecycleEvent::Schedule).unwrap();
    task.handle(LifecycleEvent::Submission).unwrap();
    assert_eq!(pending(&ctx, core_id), Some(1));
    task.handle(LifecycleEvent::SuccessfulExecution {
        profile: Some(Profile::from_stats(1, 8, 8, 8)),
    })
    .unwrap();
    task.handle(LifecycleEvent::Completion).unwrap();

    assert_eq!(pending(&ctx, core_id), Some(0));
    let records = ctx.finish().await;
    assert_eq!(records.last().map(|r| r.attempt), Some(2));
}

#[tokio::test]
async fn test_task_cancellation_disarms_its_barrier() {
    let ctx = TestContext::new().await;
    let descriptor = ctx
        .runtime
        .describe_method("app.Tasks", "long", TaskOptions::default(), false, vec![])
        .unwrap();
    let core_id = descriptor.core_id();
    let task = ctx.runtime.new_task(&descriptor);
    task.handle(LifecycleEvent::Creation).unwrap();
    task.handle(LifecycleEvent::Schedule).unwrap();

    let barrier = ctx.runtime.submit_on_ready(&task);
    let input = DataOperation::new("d1v1");
    barrier.add_operation().unwrap();
    barrier.enable().unwrap();

    task.handle(LifecycleEvent::Cancellation).unwrap();
    assert_eq!(barrier.status().outcome, Some(BarrierOutcome::Cancelled));

    // The late transfer is counted but no longer submits the job
    assert_eq!(barrier.notify_completion(&input).unwrap(), None);
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(pending(&ctx, core_id), Some(0));

    task.handle(LifecycleEvent::Failure).unwrap();
    assert!(task.handle(LifecycleEvent::Submission).is_err());

    let events: Vec<&str> = ctx.finish().await.iter().map(|r| r.event).collect();
    assert_eq!(events, vec!["creation", "schedule", "cancellation", "failure"]);
}

#[tokio::test]
async fn test_barrier_cancellation_cancels_its_task() {
    let ctx = TestContext::new().await;
    let descriptor = ctx
        .runtime
        .describe_method("app.Tasks", "long", TaskOptions::default(), false, vec![])
        .unwrap();
    let task = ctx.runtime.new_task(&descriptor);
    task.handle(LifecycleEvent::Creation).unwrap();
    task.handle(LifecycleEvent::Schedule).unwrap();

    let barrier = ctx.runtime.submit_on_ready(&task);
    let input = DataOperation::new("d1v1");
    barrier.add_operation().unwrap();
    barrier.enable().unwrap();

    assert!(barrier.cancel());
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(barrier.notify_completion(&input).unwrap(), None);
    assert!(task.handle(LifecycleEvent::Cancellation).is_err());

    task.handle(LifecycleEvent::Completion).unwrap();
    ctx.finish().await;
}

#[tokio::test]
async fn test_cancel_before_barrier_is_attached() {
    let ctx = TestContext::new().await;
    let descriptor = ctx
        .runtime
        .describe_method("app.Tasks", "long", TaskOptions::default(), false, vec![])
        .unwrap();
    let task = ctx.runtime.new_task(&descriptor);
    task.handle(LifecycleEvent::Schedule).unwrap();
    assert_eq!(task.cancel().unwrap(), TaskState::Cancelled);

    let barrier = ctx.runtime.submit_on_ready(&task);
    assert_eq!(barrier.status().outcome, Some(BarrierOutcome::Cancelled));
    assert!(barrier.enable().is_err());
    assert_eq!(task.state(), TaskState::Cancelled);
    ctx.finish().await;
}

#[tokio::test]
async fn test_concurrent_tasks_share_core_gauges() {
    let ctx = TestContext::new().await;
    let descriptor = ctx
        .runtime
        .describe_method("app.Tasks", "step", TaskOptions::default(), false, vec![])
        .unwrap();
    let core_id = descriptor.core_id();
    let tasks: Vec<_> = (0..10).map(|_| ctx.runtime.new_task(&descriptor)).collect();

    std::thread::scope(|scope| {
        for task in &tasks {
            scope.spawn(move || {
                task.handle(LifecycleEvent::Submission).unwrap();
            });
        }
    });
    assert_eq!(pending(&ctx, core_id), Some(10));

    std::thread::scope(|scope| {
        for task in &tasks {
            scope.spawn(move || {
                task.handle(LifecycleEvent::AbortedExecution).unwrap();
                task.handle(LifecycleEvent::Failure).unwrap();
            });
        }
    });
    assert_eq!(pending(&ctx, core_id), Some(0));
    ctx.finish().await;
}
