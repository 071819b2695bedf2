mod common;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use engine::{
    EngineError, FnGenerator, GenerateError, GenerateFuture, GenerateRequest, GeneratorRegistry,
    SHUTDOWN_MESSAGE,
};
use parking_lot::Mutex;
use report_core::{HealthState, JobId, JobStatus};
use serde_json::json;
use storage::StorageError;

use common::{
    Gate, counting_generator, gated_generator, html_generator, start_service, submission,
    submission_with, wait_for, wait_for_status,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_queue_rejects_and_admitted_jobs_complete() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let generators = GeneratorRegistry::new().with(gated_generator("html", gate.clone()));
    let service = start_service(generators, |cfg| cfg.with_workers(4).with_queue_capacity(100)).await?;

    let mut admitted = Vec::new();
    for _ in 0..100 {
        admitted.push(service.submit(submission("html"))?.job_id);
    }

    let overflow = submission("html");
    let overflow_id = overflow.id.clone();
    assert!(matches!(
        service.submit(overflow),
        Err(EngineError::QueueFull { capacity: 100 })
    ));
    assert!(matches!(
        service.status(&overflow_id),
        Err(EngineError::JobNotFound(_))
    ));

    gate.open();
    for job_id in &admitted {
        let record = wait_for_status(&service, job_id, JobStatus::Completed).await?;
        assert_eq!(record.progress, 100);
        assert_eq!(record.output_files.as_deref(), Some(&["report.html".to_string()][..]));
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
    }

    assert!(service.submit(submission("html")).is_ok());
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admitted_job_is_queued_behind_a_busy_worker() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let generators = GeneratorRegistry::new().with(gated_generator("html", gate.clone()));
    let service = start_service(generators, |cfg| cfg.with_workers(1)).await?;

    let first = service.submit(submission("html"))?;
    assert_eq!(first.queue_position, 1);
    wait_for_status(&service, &first.job_id, JobStatus::Running).await?;

    let second = service.submit(submission("html"))?;
    assert_eq!(second.queue_position, 1);
    let record = service.status(&second.job_id)?;
    assert_eq!(record.status, JobStatus::Queued);
    assert_eq!(record.message, "Job queued");
    assert_eq!(service.queue_position(&second.job_id), Some(1));

    gate.open();
    wait_for_status(&service, &second.job_id, JobStatus::Completed).await?;
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_job_fails_and_worker_moves_on() -> Result<(), Box<dyn Error>> {
    let generators = GeneratorRegistry::new()
        .with(FnGenerator::new("slow", |_| -> GenerateFuture {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            })
        }))
        .with(html_generator("html"));
    let service = start_service(generators, |cfg| {
        cfg.with_workers(1).with_job_timeout(Duration::from_millis(200))
    })
    .await?;

    let slow = service.submit(submission("slow"))?.job_id;
    let fast = service.submit(submission("html"))?.job_id;

    let record = wait_for_status(&service, &slow, JobStatus::Failed).await?;
    assert!(record.message.contains("timed out"), "{}", record.message);
    assert!(matches!(
        service.list_files(&slow).await,
        Err(EngineError::JobNotCompleted { status: JobStatus::Failed, .. })
    ));

    wait_for_status(&service, &fast, JobStatus::Completed).await?;
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_queued_job_never_runs() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let calls = Arc::new(AtomicUsize::new(0));
    let generators = GeneratorRegistry::new()
        .with(gated_generator("blocker", gate.clone()))
        .with(counting_generator("counted", calls.clone()));
    let service = start_service(generators, |cfg| cfg.with_workers(1)).await?;

    let blocker = service.submit(submission("blocker"))?.job_id;
    wait_for_status(&service, &blocker, JobStatus::Running).await?;

    let victim = service.submit(submission("counted"))?.job_id;
    assert!(service.cancel(&victim).await);
    let record = service.status(&victim)?;
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.completed_at.is_some());

    gate.open();
    wait_for_status(&service, &blocker, JobStatus::Completed).await?;

    // Jobs start in order, so once a later job finishes the cancelled one
    // has been dequeued and skipped.
    let later = service.submit(submission("counted"))?.job_id;
    wait_for_status(&service, &later, JobStatus::Completed).await?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.status(&victim)?.status, JobStatus::Cancelled);
    assert!(!service.cancel(&victim).await);
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jobs_start_in_submission_order() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let started = Arc::new(Mutex::new(Vec::<JobId>::new()));
    let order = started.clone();
    let generators = GeneratorRegistry::new()
        .with(gated_generator("blocker", gate.clone()))
        .with(FnGenerator::new("recorded", move |request: GenerateRequest| -> GenerateFuture {
            order.lock().push(request.job_id.clone());
            Box::pin(async { Ok(Vec::new()) })
        }));
    let service = start_service(generators, |cfg| cfg.with_workers(1)).await?;

    let blocker = service.submit(submission("blocker"))?.job_id;
    wait_for_status(&service, &blocker, JobStatus::Running).await?;

    let mut submitted = Vec::new();
    for i in 0..10 {
        let sub = submission("recorded").with_id(format!("job-{i:02}"));
        submitted.push(service.submit(sub)?.job_id);
    }
    assert!(service.cancel(&submitted[3]).await);
    assert!(service.cancel(&submitted[6]).await);

    gate.open();
    for job_id in &submitted {
        wait_for(&service, job_id, |record| record.status.is_terminal()).await?;
    }

    let expected: Vec<JobId> = submitted
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 3 && *i != 6)
        .map(|(_, id)| id.clone())
        .collect();
    assert_eq!(*started.lock(), expected);
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_a_running_job_frees_its_worker() -> Result<(), Box<dyn Error>> {
    let generators = GeneratorRegistry::new()
        .with(FnGenerator::new("stubborn", |request: GenerateRequest| -> GenerateFuture {
            Box::pin(async move {
                request.progress.report(10, "Collecting data");
                request.cancel.cancelled().await;
                Err(GenerateError::Failed("stopped".into()))
            })
        }))
        .with(html_generator("html"));
    let service = start_service(generators, |cfg| cfg.with_workers(1)).await?;

    let job_id = service.submit(submission("stubborn"))?.job_id;
    wait_for(&service, &job_id, |record| record.progress == 10).await?;

    assert!(service.cancel(&job_id).await);
    let record = service.status(&job_id)?;
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.message, "Cancelled by user");

    // The worker is free again and the record was not overwritten.
    let next = service.submit(submission("html"))?.job_id;
    wait_for_status(&service, &next, JobStatus::Completed).await?;
    let record = service.status(&job_id)?;
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.message, "Cancelled by user");
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_is_a_no_op_for_finished_and_unknown_jobs() -> Result<(), Box<dyn Error>> {
    let generators = GeneratorRegistry::new().with(html_generator("html"));
    let service = start_service(generators, |cfg| cfg).await?;

    let job_id = service.submit(submission("html"))?.job_id;
    let before = wait_for_status(&service, &job_id, JobStatus::Completed).await?;

    assert!(!service.cancel(&job_id).await);
    assert!(!service.cancel(&JobId::from("never-submitted")).await);

    let after = service.status(&job_id)?;
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.last_updated, before.last_updated);
    assert_eq!(service.list_files(&job_id).await?.len(), 1);
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completed_files_can_be_listed_and_resolved() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let generators = GeneratorRegistry::new()
        .with(html_generator("html"))
        .with(gated_generator("held", gate.clone()));
    let service = start_service(generators, |cfg| cfg).await?;

    let job_id = service
        .submit(submission_with("html", "title", json!("Q3 sales")))?
        .job_id;
    wait_for_status(&service, &job_id, JobStatus::Completed).await?;

    let files = service.list_files(&job_id).await?;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].filename, "report.html");
    assert_eq!(files[0].content_type, "text/html");
    assert!(files[0].size_bytes > 0);

    let path = service.file_download_path(&job_id, "report.html").await?;
    let body = tokio::fs::read_to_string(&path).await?;
    assert!(body.contains("Q3 sales"));

    for hostile in ["../report.html", "/etc/passwd", "", ".", "missing.html"] {
        assert!(
            matches!(
                service.file_download_path(&job_id, hostile).await,
                Err(EngineError::FileNotFound { .. })
            ),
            "{hostile:?} should not resolve"
        );
    }

    assert!(matches!(
        service.list_files(&JobId::from("unknown")).await,
        Err(EngineError::JobNotFound(_))
    ));

    let held = service.submit(submission("held"))?.job_id;
    wait_for_status(&service, &held, JobStatus::Running).await?;
    assert!(matches!(
        service.list_files(&held).await,
        Err(EngineError::JobNotCompleted { status: JobStatus::Running, .. })
    ));

    gate.open();
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn generator_problems_fail_the_job() -> Result<(), Box<dyn Error>> {
    let generators = GeneratorRegistry::new()
        .with(FnGenerator::new("broken", |_| -> GenerateFuture {
            Box::pin(async {
                Err::<Vec<PathBuf>, _>(GenerateError::InvalidArguments("missing period".into()))
            })
        }))
        .with(FnGenerator::new("exe", |request: GenerateRequest| -> GenerateFuture {
            Box::pin(async move {
                let path = request.output_dir.join("payload.exe");
                tokio::fs::write(&path, b"MZ").await?;
                Ok::<_, GenerateError>(vec![path])
            })
        }));
    let service = start_service(generators, |cfg| cfg).await?;

    let broken = service.submit(submission("broken"))?.job_id;
    let record = wait_for_status(&service, &broken, JobStatus::Failed).await?;
    assert!(record.message.contains("missing period"), "{}", record.message);

    let unknown = service.submit(submission("no-such-report"))?.job_id;
    let record = wait_for_status(&service, &unknown, JobStatus::Failed).await?;
    assert!(record.message.contains("No generator registered"), "{}", record.message);

    let exe = service.submit(submission("exe"))?.job_id;
    let record = wait_for_status(&service, &exe, JobStatus::Failed).await?;
    assert!(record.message.contains("rejected"), "{}", record.message);
    assert!(record.output_files.is_none());
    assert!(service.file_download_path(&exe, "payload.exe").await.is_err());
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_outputs_fail_without_being_stored() -> Result<(), Box<dyn Error>> {
    let generators = GeneratorRegistry::new().with(html_generator("html"));
    let service = start_service(generators, |cfg| {
        let storage = cfg.storage.clone().with_max_file_size(16);
        cfg.with_storage(storage)
    })
    .await?;

    let job = service.submit(submission("html"))?.job_id;
    let record = wait_for_status(&service, &job, JobStatus::Failed).await?;
    assert!(record.message.contains("too large"), "{}", record.message);
    assert!(record.output_files.is_none());
    assert!(service.file_download_path(&job, "report.html").await.is_err());
    assert_eq!(service.health().await.total_files, 0);
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_and_unsafe_ids_are_rejected() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let generators = GeneratorRegistry::new().with(gated_generator("html", gate.clone()));
    let service = start_service(generators, |cfg| cfg).await?;

    service.submit(submission("html").with_id("dup"))?;
    assert!(matches!(
        service.submit(submission("html").with_id("dup")),
        Err(EngineError::DuplicateJob(_))
    ));
    assert!(matches!(
        service.submit(submission("html").with_id("../evil")),
        Err(EngineError::Storage(StorageError::InvalidJobId(_)))
    ));

    gate.open();
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_is_visible_while_running() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let held = gate.clone();
    let generators = GeneratorRegistry::new().with(FnGenerator::new(
        "staged",
        move |request: GenerateRequest| -> GenerateFuture {
            let gate = held.clone();
            Box::pin(async move {
                request.progress.report(50, "Half way");
                gate.wait().await;
                let path = request.output_dir.join("data.csv");
                tokio::fs::write(&path, "a,b\n1,2\n").await?;
                Ok::<_, GenerateError>(vec![path])
            })
        },
    ));
    let service = start_service(generators, |cfg| cfg).await?;

    let job_id = service.submit(submission("staged"))?.job_id;
    let record = wait_for(&service, &job_id, |record| record.progress == 50).await?;
    assert_eq!(record.status, JobStatus::Running);
    assert_eq!(record.message, "Half way");

    gate.open();
    let record = wait_for_status(&service, &job_id, JobStatus::Completed).await?;
    assert_eq!(record.progress, 100);
    assert_eq!(record.output_files, Some(vec!["data.csv".to_string()]));
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_sweep_evicts_only_finished_jobs() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let generators = GeneratorRegistry::new()
        .with(html_generator("html"))
        .with(gated_generator("held", gate.clone()));
    let service =
        start_service(generators, |cfg| cfg.with_status_retention(Duration::ZERO)).await?;

    let done = service.submit(submission("html"))?.job_id;
    wait_for_status(&service, &done, JobStatus::Completed).await?;
    let held = service.submit(submission("held"))?.job_id;
    wait_for_status(&service, &held, JobStatus::Running).await?;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(service.sweep_status_now().await?, 1);
    assert!(matches!(service.status(&done), Err(EngineError::JobNotFound(_))));
    assert_eq!(service.status(&held)?.status, JobStatus::Running);

    // Files outlive the evicted record.
    assert!(service.file_download_path(&done, "report.html").await.is_ok());

    gate.open();
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_sweep_removes_expired_job_directories() -> Result<(), Box<dyn Error>> {
    let generators = GeneratorRegistry::new().with(html_generator("html"));
    let service = start_service(generators, |cfg| {
        let storage = cfg.storage.clone().with_retention(Duration::ZERO);
        cfg.with_storage(storage)
    })
    .await?;

    let job_id = service.submit(submission("html"))?.job_id;
    wait_for_status(&service, &job_id, JobStatus::Completed).await?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.sweep_files_now().await?, 1);
    assert!(service.file_download_path(&job_id, "report.html").await.is_err());
    assert!(service.list_files(&job_id).await?.is_empty());
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_reflects_queue_and_storage() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let generators = GeneratorRegistry::new()
        .with(html_generator("html"))
        .with(gated_generator("held", gate.clone()));
    let service = start_service(generators, |cfg| cfg.with_workers(2)).await?;

    let done = service.submit(submission("html"))?.job_id;
    wait_for_status(&service, &done, JobStatus::Completed).await?;

    let held = service.submit(submission("held"))?.job_id;
    wait_for_status(&service, &held, JobStatus::Running).await?;

    // The first worker may still be wrapping up its finished job.
    let mut health = service.health().await;
    for _ in 0..200 {
        if health.available_workers == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        health = service.health().await;
    }
    assert_eq!(health.active_jobs, 1);
    assert_eq!(health.available_workers, 1);
    assert_eq!(health.queue_size, 0);
    assert_eq!(health.total_files, 1);
    // The threshold is zero, so only an unknown disk can degrade the service.
    let expected = if health.available_disk_bytes.is_some() {
        HealthState::Healthy
    } else {
        HealthState::Degraded
    };
    assert_eq!(health.state, expected);

    gate.open();
    wait_for_status(&service, &held, JobStatus::Completed).await?;
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn low_disk_space_degrades_health() -> Result<(), Box<dyn Error>> {
    let service = start_service(GeneratorRegistry::new(), |cfg| {
        cfg.with_min_free_disk_bytes(u64::MAX)
    })
    .await?;

    let health = service.health().await;
    assert_eq!(health.state, HealthState::Degraded);
    assert_eq!(health.available_workers, 4);
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_work_and_refuses_new_jobs() -> Result<(), Box<dyn Error>> {
    let gate = Gate::closed();
    let generators = GeneratorRegistry::new().with(gated_generator("held", gate.clone()));
    let service = start_service(generators, |cfg| cfg.with_workers(1)).await?;

    let running = service.submit(submission("held"))?.job_id;
    wait_for_status(&service, &running, JobStatus::Running).await?;
    let queued = service.submit(submission("held"))?.job_id;

    service.shutdown().await;

    for job_id in [&running, &queued] {
        let record = service.status(job_id)?;
        assert_eq!(record.status, JobStatus::Cancelled);
        assert_eq!(record.message, SHUTDOWN_MESSAGE);
    }
    assert!(matches!(
        service.submit(submission("held")),
        Err(EngineError::ShuttingDown)
    ));

    // Idempotent.
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submissions_racing_shutdown_never_stay_queued() -> Result<(), Box<dyn Error>> {
    for _ in 0..10 {
        let gate = Gate::closed();
        let generators = GeneratorRegistry::new().with(gated_generator("held", gate.clone()));
        let service = Arc::new(
            start_service(generators, |cfg| {
                cfg.with_workers(1)
                    .with_queue_capacity(10_000)
                    .with_shutdown_grace(Duration::from_millis(200))
            })
            .await?,
        );

        let submitters: Vec<_> = (0..6)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    let mut accepted = Vec::new();
                    loop {
                        match service.submit(submission("held")) {
                            Ok(admission) => accepted.push(admission.job_id),
                            Err(EngineError::ShuttingDown) => return Ok(accepted),
                            Err(EngineError::QueueFull { .. }) => {}
                            Err(e) => return Err(e.to_string()),
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        service.shutdown().await;

        let mut accepted = Vec::new();
        for submitter in submitters {
            accepted.extend(submitter.await??);
        }
        for job_id in &accepted {
            let record = service.status(job_id)?;
            assert!(record.status.is_terminal(), "job {job_id} left {}", record.status);
            assert_eq!(service.queue_position(job_id), None);
        }
    }
    Ok(())
}
