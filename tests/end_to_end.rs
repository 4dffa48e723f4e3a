use mutaflow::annotate::{ClinicalSignificance, FilterCriteria, InfoFactSource, Preset};
use mutaflow::protocol::{FileDropRunner, JobRequest};
use mutaflow::samples::SampleTable;
use mutaflow::store::JsonStore;
use mutaflow::{Collaborators, JobStatus, Orchestrator, OrchestratorOptions};
use std::path::Path;
use std::sync::Arc;

const VCF: &str = "##fileformat=VCFv4.2
##source=Mutect2
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1
chr7\t55259515\t.\tT\tG\t.\tPASS\tAF=0.35;DP=500;AD=325,175;Gene=EGFR;COSMIC=COSM6224\tGT\t0/1
chr12\t25398284\t.\tC\tT\t.\tPASS\tAF=0.22;DP=310;AD=242,68;Gene=KRAS;DB=rs121913529\tGT\t0/1
chr17\t7577120\t.\tCA\tC\t.\tweak_evidence\tAF=0.04;DP=90;AD=86,4;Gene=TP53\tGT\t0/1
chr3\t178936091\t.\tG\tA\t.\tPASS\tGene=PIK3CA\tGT\t0/1
";

fn orchestrator(root: &Path) -> Orchestrator {
    let mut samples = SampleTable::default();
    samples.insert("S1", "/data/bams/S1.bam");

    let parts = Collaborators {
        store: Arc::new(JsonStore::open(root.join("state")).unwrap()),
        samples: Arc::new(samples),
        runner: Arc::new(FileDropRunner::new(
            &root.join("inputs"),
            &root.join("outputs"),
            "/data/references/GRCh38.fa",
        )),
        facts: Arc::new(InfoFactSource),
    };
    let options = OrchestratorOptions {
        auto_ingest: false,
        output_dir: root.join("outputs"),
        ..OrchestratorOptions::default()
    };
    Orchestrator::new(parts, options).unwrap()
}

#[test]
fn file_drop_job_runs_to_annotated_variants() {
    let root = tempfile::tempdir().unwrap();
    let orch = orchestrator(root.path());

    let job = orch.submit_job("S1", None, "4.4.0", "Mutect2").unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.id.as_str(), "1");
    orch.wait_for_idle();

    // the request artifact is what the external runner picks up
    let request_path = root.path().join("inputs/job_request_1.json");
    let request: JobRequest =
        serde_json::from_str(&std::fs::read_to_string(&request_path).unwrap()).unwrap();
    assert_eq!(request.tumor_bam, "/data/bams/S1.bam");
    assert_eq!(request.normal_bam, None);
    assert_eq!(request.calling_method, "Mutect2");

    let job = orch.get_job_status(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Submitted);

    // runner reports progress, then completion
    let outputs = root.path().join("outputs");
    std::fs::create_dir_all(outputs.join("1")).unwrap();
    std::fs::write(
        outputs.join("1.status"),
        r#"{"status": "running", "progress": "Mutect2 60%"}"#,
    )
    .unwrap();
    let job = orch.get_job_status(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(job.progress_log.as_deref(), Some("Mutect2 60%"));

    let vcf_path = outputs.join("1/variants.vcf");
    std::fs::write(&vcf_path, VCF).unwrap();
    std::fs::write(
        outputs.join("1.status"),
        serde_json::json!({"status": "completed", "vcf_path": vcf_path}).to_string(),
    )
    .unwrap();

    let job = orch.get_job_status(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.end_time.is_some());

    let summary = orch.ingest_completed_job(&job.id).unwrap();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.passed, 3);

    let job = orch.get_job_status(&job.id).unwrap();
    assert_eq!(job.total_variants_called, Some(4));
    assert_eq!(job.variants_passed_filter, Some(3));
    assert!(job.error_message.is_none());

    let variants = orch.variants(&job.id).unwrap();
    assert_eq!(variants.len(), 4);
    assert_eq!(variants.iter().filter(|v| v.is_pass()).count(), 3);

    let annotations = orch.annotations(&job.id).unwrap();
    assert_eq!(annotations.len(), 4);
    assert_eq!(
        annotations[0].clinical_significance,
        ClinicalSignificance::UncertainSignificance
    );

    let criteria = FilterCriteria::from_pairs([("variantEffect", "missense_variant")]).unwrap();
    assert_eq!(orch.filter_annotations(&job.id, &criteria).unwrap().len(), 3);
    assert!(orch
        .annotations_matching(&job.id, Preset::Actionable)
        .unwrap()
        .is_empty());

    // completed jobs cannot be cancelled and stay as they are
    assert!(!orch.cancel_job(&job.id).unwrap());
    assert_eq!(orch.get_job_status(&job.id).unwrap(), job);
}

#[test]
fn state_survives_a_new_orchestrator() {
    let root = tempfile::tempdir().unwrap();
    let id = {
        let orch = orchestrator(root.path());
        let job = orch.submit_job("S1", None, "4.4.0", "Mutect2").unwrap();
        orch.wait_for_idle();
        job.id
    };

    let orch = orchestrator(root.path());
    assert_eq!(orch.get_job_status(&id).unwrap().status, JobStatus::Submitted);

    assert!(orch.cancel_job(&id).unwrap());
    assert_eq!(orch.get_job_status(&id).unwrap().status, JobStatus::Cancelled);
    assert!(root.path().join("inputs/cancel_1.json").exists());

    let next = orch.submit_job("S1", None, "4.4.0", "Mutect2").unwrap();
    assert_eq!(next.id.as_str(), "2");
    orch.wait_for_idle();
}
