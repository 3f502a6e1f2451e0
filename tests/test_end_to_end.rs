
use phorager::config::{AnnotationConfig, StructuralConfig};
use phorager::pipeline::*;
use phorager::prediction::DetectorInputs;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use test_utils::{create_genome, create_table, fasta_names, read_count};

const DETECTOR_HEADER: &str = "genome_id\tcontig_id\tstart\tend\tsource_tool";
const QUALITY_HEADER: &str = "contig_id\tcontig_length\tcheckv_quality";
const ANNOTATION_HEADER: &str = "contig_id\tCDS\thead_and_packaging\tconnector\ttail\tlysis";

/// Every survivor of the cascade lands in exactly one cluster
fn assert_clusters_cover_survivors(annotated: &AnnotationResult) {
    let members: Vec<&str> = annotated
        .clusters
        .iter()
        .flat_map(|c| c.member_ids.iter().map(String::as_str))
        .collect();
    let unique: BTreeSet<&str> = members.iter().copied().collect();
    assert_eq!(unique.len(), members.len(), "a sequence is in two clusters");
    let survivors: BTreeSet<&str> = annotated.cascade.survivors().iter().map(String::as_str).collect();
    assert_eq!(unique, survivors);
}

fn assert_all_artifacts(out: &Path, structural: bool) {
    let mut expected = vec![
        CONSOLIDATED_COORDINATES,
        ALL_PROPHAGE_SEQUENCES,
        DETECTION_SUMMARY,
        QUALITY_SUMMARY,
        QUALITY_COUNT,
        QUALITY_FASTA,
        CLUSTER_TABLE,
        REPRESENTATIVES_FASTA,
        CLUSTER_COUNT,
        SUMMARY_REPORT,
    ];
    if structural {
        expected.extend([STRUCTURAL_SUMMARY, STRUCTURAL_COUNT, STRUCTURAL_FASTA]);
    }
    for name in expected {
        assert!(out.join(name).exists(), "missing artifact {name}");
    }
}

#[test]
fn test_zero_predictions_produces_every_artifact() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let genome = create_genome(dir.path(), "g1", &[("contig_1", 5_000)]);
    let genomad = create_table(&dir.path().join("genomad.tsv"), Some(DETECTOR_HEADER), &[]);
    let vibrant = create_table(&dir.path().join("vibrant.tsv"), None, &[]);

    let detection = DetectionConfig {
        detectors: DetectorInputs {
            genomad: Some(genomad),
            vibrant: Some(vibrant),
        },
        genome_fastas: vec![genome],
    };
    let config = AnnotationConfig {
        structural: Some(StructuralConfig::default()),
        ..Default::default()
    };

    // No external-tool tables: nothing needs them when there is nothing to filter
    let (detected, annotated) =
        run(&detection, &AnnotationInputs::default(), &config, &out).unwrap();

    assert_eq!(detected.counts().consolidated_regions, 0);
    assert!(annotated.clusters.is_empty());
    assert_all_artifacts(&out, true);

    let coordinates = fs::read_to_string(out.join(CONSOLIDATED_COORDINATES)).unwrap();
    assert_eq!(coordinates, format!("{DETECTOR_HEADER}\n"));
    assert_eq!(fs::read_to_string(out.join(ALL_PROPHAGE_SEQUENCES)).unwrap(), "");
    assert_eq!(read_count(&out.join(QUALITY_COUNT)), 0);
    assert_eq!(read_count(&out.join(STRUCTURAL_COUNT)), 0);
    assert_eq!(read_count(&out.join(CLUSTER_COUNT)), 0);
    assert_eq!(fs::read_to_string(out.join(CLUSTER_TABLE)).unwrap(), "");

    let report = fs::read_to_string(out.join(SUMMARY_REPORT)).unwrap();
    assert!(report.contains("no regions detected"));
    let detection_summary = fs::read_to_string(out.join(DETECTION_SUMMARY)).unwrap();
    assert!(detection_summary.contains("no regions detected"));
}

struct Fixture {
    dir: TempDir,
    detection: DetectionConfig,
    inputs: AnnotationInputs,
}

/// Two genomes: g1 has overlapping calls on contig_1 and an undetermined call on contig_2,
/// g2 has predictions but no FASTA and fails as a unit
fn two_genome_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path();
    let genome = create_genome(path, "g1", &[("contig_1", 20_000), ("contig_2 plasmid", 12_000)]);

    let genomad = create_table(
        &path.join("genomad.tsv"),
        Some(DETECTOR_HEADER),
        &[
            "g1\tcontig_1\t1000\t8000\tgenomad",
            "g2\tchr\t100\t900\tgenomad",
            "g1\tcontig_1\tabc\t900\tgenomad",
        ],
    );
    let vibrant = create_table(
        &path.join("vibrant.tsv"),
        None,
        &[
            "g1\tcontig_1\t7000\t12000\tvibrant",
            "g1\tcontig_2\tNA\tNA\tvibrant",
        ],
    );

    let quality = create_table(
        &path.join("quality_summary.tsv"),
        Some(QUALITY_HEADER),
        &[
            "contig_1_1000_12000\t11001\tHigh-quality",
            "contig_2_complete\t12000\tComplete",
        ],
    );
    let pharokka = create_table(
        &path.join("pharokka.tsv"),
        Some(ANNOTATION_HEADER),
        &["contig_1_1000_12000\t20\t3\t1\t4\t2", "contig_2_complete\t20\t0\t0\t1\t2"],
    );
    let phold = create_table(
        &path.join("phold.tsv"),
        Some(ANNOTATION_HEADER),
        &["contig_1_1000_12000\t20\t1\t0\t0\t2", "contig_2_complete\t20\t4\t1\t2\t2"],
    );
    let alignments = create_table(
        &path.join("ani.tsv"),
        Some("qname\ttname\tani\tqcov\ttcov"),
        &["contig_1_1000_12000\tcontig_2_complete\t99.5\t90.0\t92.0"],
    );

    Fixture {
        detection: DetectionConfig {
            detectors: DetectorInputs {
                genomad: Some(genomad),
                vibrant: Some(vibrant),
            },
            genome_fastas: vec![genome],
        },
        inputs: AnnotationInputs {
            quality_table: Some(quality),
            pharokka_table: Some(pharokka),
            phold_table: Some(phold),
            alignment_table: Some(alignments),
        },
        dir,
    }
}

#[test]
fn test_full_run_consolidates_filters_and_clusters() {
    let fixture = two_genome_fixture();
    let out = fixture.dir.path().join("out");
    let config = AnnotationConfig {
        structural: Some(StructuralConfig::default()),
        ..Default::default()
    };

    let (detected, annotated) = run(&fixture.detection, &fixture.inputs, &config, &out).unwrap();

    let counts = detected.counts();
    assert_eq!(counts.genomes, 2);
    assert_eq!(counts.failed_genomes, vec!["g2".to_string()]);
    assert_eq!(counts.coordinate_errors, 1);
    assert_eq!(counts.consolidated_regions, 3);
    assert_eq!(counts.whole_contig_regions, 1);
    assert_eq!(counts.extracted, 2);

    assert_eq!(
        fasta_names(&out.join(ALL_PROPHAGE_SEQUENCES)),
        vec!["contig_1_1000_12000", "contig_2_complete"]
    );
    let coordinates = fs::read_to_string(out.join(CONSOLIDATED_COORDINATES)).unwrap();
    assert!(coordinates.contains("g1\tcontig_1\t1000\t12000\tgenomad,vibrant"));
    assert!(coordinates.contains("g1\tcontig_2\tNA\tNA\tvibrant"));

    // Both pass quality; contig_1 passes via Pharokka, contig_2 via PHOLD
    assert_eq!(read_count(&out.join(QUALITY_COUNT)), 2);
    assert_eq!(read_count(&out.join(STRUCTURAL_COUNT)), 2);

    // One cluster, represented by the longer sequence
    assert_eq!(annotated.clusters.len(), 1);
    assert_eq!(annotated.clusters[0].representative_id, "contig_2_complete");
    assert_eq!(
        fs::read_to_string(out.join(CLUSTER_TABLE)).unwrap(),
        "contig_2_complete\tcontig_2_complete,contig_1_1000_12000\n"
    );
    assert_eq!(
        fasta_names(&out.join(REPRESENTATIVES_FASTA)),
        vec!["contig_2_complete"]
    );
    assert_eq!(read_count(&out.join(CLUSTER_COUNT)), 1);
    assert_clusters_cover_survivors(&annotated);

    let report = fs::read_to_string(out.join(SUMMARY_REPORT)).unwrap();
    assert!(report.contains("Clusters: 1"));
    assert!(report.contains("Failed genomes: 1"));
}

/// Two genomes that both yield sequences from a contig named `contig_1`, with geNomad
/// and VIBRANT naming g1's contig differently
fn shared_contig_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path();
    let g1 = create_genome(path, "g1", &[("contig_1", 20_000)]);
    let g2 = create_genome(path, "g2", &[("contig_1", 20_000), ("contig_2", 8_000)]);

    let genomad = create_table(
        &path.join("genomad.tsv"),
        Some(DETECTOR_HEADER),
        &[
            "g1\tcontig_1|provirus_1000_6000\t1000\t6000\tgenomad",
            "g2\tcontig_1\t1000\t9000\tgenomad",
        ],
    );
    let vibrant = create_table(
        &path.join("vibrant.tsv"),
        None,
        &[
            "g1\tcontig_1_fragment_1\t5000\t9000\tvibrant",
            "g2\tcontig_2\t100\t6000\tvibrant",
        ],
    );

    let quality = create_table(
        &path.join("quality_summary.tsv"),
        Some(QUALITY_HEADER),
        &[
            "g1_contig_1_1000_9000\t8001\tHigh-quality",
            "g2_contig_1_1000_9000\t8001\tHigh-quality",
            "contig_2_100_6000\t5901\tMedium-quality",
        ],
    );
    let alignments = create_table(
        &path.join("ani.tsv"),
        Some("qname\ttname\tani\tqcov\ttcov"),
        &["g1_contig_1_1000_9000\tg2_contig_1_1000_9000\t99.9\t100.0\t100.0"],
    );

    Fixture {
        detection: DetectionConfig {
            detectors: DetectorInputs {
                genomad: Some(genomad),
                vibrant: Some(vibrant),
            },
            genome_fastas: vec![g1, g2],
        },
        inputs: AnnotationInputs {
            quality_table: Some(quality),
            alignment_table: Some(alignments),
            ..Default::default()
        },
        dir,
    }
}

#[test]
fn test_shared_contig_names_across_genomes_stay_distinct() {
    let fixture = shared_contig_fixture();
    let out = fixture.dir.path().join("out");
    let config = AnnotationConfig::default();

    let (detected, annotated) = run(&fixture.detection, &fixture.inputs, &config, &out).unwrap();

    let counts = detected.counts();
    assert_eq!(counts.genomes, 2);
    assert!(counts.failed_genomes.is_empty());
    // g1's two differently named calls are one region
    assert_eq!(counts.consolidated_regions, 3);
    assert_eq!(counts.extracted, 3);
    assert_eq!(counts.qualified_ids, 2);

    let coordinates = fs::read_to_string(out.join(CONSOLIDATED_COORDINATES)).unwrap();
    assert!(coordinates.contains("g1\tcontig_1|provirus_1000_6000\t1000\t9000\tgenomad,vibrant"));

    let names = fasta_names(&out.join(ALL_PROPHAGE_SEQUENCES));
    assert_eq!(
        names,
        vec!["g1_contig_1_1000_9000", "g2_contig_1_1000_9000", "contig_2_100_6000"]
    );
    assert_eq!(read_count(&out.join(QUALITY_COUNT)), names.len());
    assert_eq!(fasta_names(&out.join(QUALITY_FASTA)), names);

    assert_eq!(annotated.clusters.len(), 2);
    assert_clusters_cover_survivors(&annotated);
    assert_eq!(read_count(&out.join(CLUSTER_COUNT)), 2);

    let summary = fs::read_to_string(out.join(DETECTION_SUMMARY)).unwrap();
    assert!(summary.contains("Sequence ids prefixed with genome id: 2"));
}

#[test]
fn test_regions_without_sequences_are_reported_as_unextracted() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let genome = create_genome(dir.path(), "g1", &[("chromosome", 5_000)]);
    let genomad = create_table(
        &dir.path().join("genomad.tsv"),
        Some(DETECTOR_HEADER),
        &["g1\tplasmid_9\t100\t900\tgenomad"],
    );
    let detection = DetectionConfig {
        detectors: DetectorInputs {
            genomad: Some(genomad),
            vibrant: None,
        },
        genome_fastas: vec![genome],
    };

    let (detected, annotated) = run(
        &detection,
        &AnnotationInputs::default(),
        &AnnotationConfig::default(),
        &out,
    )
    .unwrap();

    assert_eq!(detected.counts().consolidated_regions, 1);
    assert_eq!(detected.counts().extracted, 0);
    assert!(annotated.clusters.is_empty());

    let report = fs::read_to_string(out.join(SUMMARY_REPORT)).unwrap();
    assert!(report.contains("regions detected but none could be extracted"));
    assert!(!report.contains("no regions detected"));
}

#[test]
fn test_strict_length_empties_quality_stage_gracefully() {
    let fixture = two_genome_fixture();
    let out = fixture.dir.path().join("out");
    let mut config = AnnotationConfig {
        structural: Some(StructuralConfig::default()),
        ..Default::default()
    };
    config.quality.min_length = 50_000;

    // Annotation and alignment tables are not needed once nothing passes quality
    let inputs = AnnotationInputs {
        quality_table: fixture.inputs.quality_table.clone(),
        ..Default::default()
    };
    let (_, annotated) = run(&fixture.detection, &inputs, &config, &out).unwrap();

    assert!(annotated.clusters.is_empty());
    assert_all_artifacts(&out, true);
    assert_eq!(read_count(&out.join(QUALITY_COUNT)), 0);
    assert_eq!(read_count(&out.join(STRUCTURAL_COUNT)), 0);
    assert_eq!(fs::read_to_string(out.join(QUALITY_FASTA)).unwrap(), "");

    let report = fs::read_to_string(out.join(SUMMARY_REPORT)).unwrap();
    assert!(report.contains("--min-prophage-length"));
}

#[test]
fn test_missing_quality_table_is_an_error_when_sequences_exist() {
    let fixture = two_genome_fixture();
    let out = fixture.dir.path().join("out");
    let result = run(
        &fixture.detection,
        &AnnotationInputs::default(),
        &AnnotationConfig::default(),
        &out,
    );
    assert!(result.is_err());
}

#[test]
fn test_binary_consolidate_subcommand() {
    let fixture = two_genome_fixture();
    let out = fixture.dir.path().join("cli_out");
    let genomad = fixture.detection.detectors.genomad.clone().unwrap();
    let genome = fixture.detection.genome_fastas[0].clone();

    let status = Command::new(env!("CARGO_BIN_EXE_phorager"))
        .arg("--quiet")
        .arg("consolidate")
        .arg("--genomad")
        .arg(&genomad)
        .arg("--genomes")
        .arg(&genome)
        .arg("--outdir")
        .arg(&out)
        .status()
        .expect("Failed to run phorager");
    assert!(status.success());

    assert_eq!(
        fasta_names(&out.join(ALL_PROPHAGE_SEQUENCES)),
        vec!["contig_1_1000_8000"]
    );
}

#[test]
fn test_binary_rejects_conflicting_flags() {
    let dir = TempDir::new().unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_phorager"))
        .args(["--quiet", "annotate", "--sequences"])
        .arg(dir.path().join("none.fasta"))
        .args(["--annotation-filter-mode", "pharokka", "--phold-structural-total", "5"])
        .status()
        .expect("Failed to run phorager");
    assert!(!status.success());
}
