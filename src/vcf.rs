//! VCF parsing for somatic variant ingestion
//!
//! Turns the caller's variant-call file into typed records. Only the eight
//! fixed columns are read; FORMAT/sample columns are ignored because the
//! somatic caller reports the tumor evidence in INFO.

use crate::error::{PipelineError, Result};
use crate::job::JobId;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Structural class of a variant, derived from allele lengths only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantKind {
    Snv,
    Insertion,
    Deletion,
    Complex,
}

impl VariantKind {
    pub fn from_alleles(ref_allele: &str, alt_allele: &str) -> Self {
        let (r, a) = (ref_allele.len(), alt_allele.len());
        if r == 1 && a == 1 {
            VariantKind::Snv
        } else if r > a {
            VariantKind::Deletion
        } else if r < a {
            VariantKind::Insertion
        } else {
            VariantKind::Complex
        }
    }
}

impl std::fmt::Display for VariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariantKind::Snv => write!(f, "SNV"),
            VariantKind::Insertion => write!(f, "INSERTION"),
            VariantKind::Deletion => write!(f, "DELETION"),
            VariantKind::Complex => write!(f, "COMPLEX"),
        }
    }
}

/// Annotation-oriented INFO keys written by the pipeline's annotator stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoAnnotation {
    /// Consequence term (e.g. missense_variant)
    #[serde(default)]
    pub consequence: Option<String>,
    /// IMPACT (HIGH/MODERATE/LOW/MODIFIER)
    #[serde(default)]
    pub impact: Option<String>,
    /// dbSNP identifier from `DB=rs...`
    #[serde(default)]
    pub dbsnp_id: Option<String>,
    /// Bare `DB` flag: known to dbSNP without an identifier
    #[serde(default)]
    pub in_dbsnp: bool,
    #[serde(default)]
    pub cosmic_id: Option<String>,
}

/// One called alteration belonging to a calling job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    /// 1-based line number in the source file, unique within the job
    pub id: u64,
    pub job_id: JobId,
    pub chrom: String,
    /// 1-based position
    pub pos: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub kind: VariantKind,
    #[serde(default)]
    pub gene_symbol: Option<String>,
    /// AF from INFO
    #[serde(default)]
    pub allele_freq: Option<f64>,
    /// DP from INFO
    #[serde(default)]
    pub depth: Option<u32>,
    /// Second component of AD from INFO
    #[serde(default)]
    pub alt_reads: Option<u32>,
    /// Filter status (PASS, or filter name)
    pub filter: String,
    #[serde(default)]
    pub info: InfoAnnotation,
}

impl VariantRecord {
    pub fn is_pass(&self) -> bool {
        self.filter == "PASS"
    }

    /// Lookup key shared with knowledge-source fact files
    pub fn lookup_key(&self) -> String {
        format!(
            "{}:{}:{}>{}",
            self.chrom, self.pos, self.ref_allele, self.alt_allele
        )
    }
}

/// Records of one variant-call file plus its summary counters
#[derive(Debug, Clone, Default)]
pub struct VcfBatch {
    pub records: Vec<VariantRecord>,
    /// Number of data lines
    pub total: usize,
    /// Data lines with FILTER == PASS
    pub passed: usize,
}

/// Parse one data line (`line_no` is 1-based and becomes the record id).
///
/// Header lines must be skipped by the caller.
pub fn parse_vcf_line(line: &str, job_id: &JobId, line_no: usize) -> Result<VariantRecord> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(PipelineError::parse(
            line_no,
            format!("expected at least 8 tab-separated fields, found {}", fields.len()),
        ));
    }

    let chrom = fields[0].to_string();
    let pos: u64 = fields[1].parse().map_err(|_| {
        PipelineError::parse(line_no, format!("position is not numeric: '{}'", fields[1]))
    })?;
    if pos == 0 {
        return Err(PipelineError::parse(line_no, "position must be 1-based"));
    }
    let ref_allele = fields[3].to_string();
    let alt_allele = fields[4].to_string();
    if ref_allele.is_empty() || alt_allele.is_empty() {
        return Err(PipelineError::parse(line_no, "empty REF or ALT allele"));
    }
    let filter = fields[6].to_string();
    let info = fields[7];

    let allele_freq = parse_info_float(info, "AF");
    if let Some(af) = allele_freq {
        if !(0.0..=1.0).contains(&af) {
            return Err(PipelineError::parse(
                line_no,
                format!("allele frequency out of range: {}", af),
            ));
        }
    }
    let depth = parse_info_field(info, "DP");
    let alt_reads = parse_allele_depth(info);
    if let (Some(dp), Some(alt)) = (depth, alt_reads) {
        if alt > dp {
            return Err(PipelineError::parse(
                line_no,
                format!("alt read count {} exceeds depth {}", alt, dp),
            ));
        }
    }

    Ok(VariantRecord {
        id: line_no as u64,
        job_id: job_id.clone(),
        kind: VariantKind::from_alleles(&ref_allele, &alt_allele),
        chrom,
        pos,
        ref_allele,
        alt_allele,
        gene_symbol: info_value(info, "Gene").map(str::to_string),
        allele_freq,
        depth,
        alt_reads,
        filter,
        info: parse_info_annotation(info),
    })
}

/// Raw value of `KEY=VALUE` in an INFO column
fn info_value<'a>(info: &'a str, key: &str) -> Option<&'a str> {
    info.split(';').find_map(|part| {
        let (k, v) = part.split_once('=')?;
        (k == key && !v.is_empty()).then_some(v)
    })
}

/// Whether a bare flag (or key with value) is present
fn info_has_flag(info: &str, key: &str) -> bool {
    info.split(';')
        .any(|part| part == key || part.split_once('=').map(|(k, _)| k) == Some(key))
}

/// Parse an integer field from INFO
fn parse_info_field(info: &str, key: &str) -> Option<u32> {
    info_value(info, key)?.split(',').next()?.parse().ok()
}

/// Parse a float field from INFO
fn parse_info_float(info: &str, key: &str) -> Option<f64> {
    info_value(info, key)?.split(',').next()?.parse().ok()
}

/// Alternate-supporting reads: second component of `AD=ref,alt`
fn parse_allele_depth(info: &str) -> Option<u32> {
    let value = info_value(info, "AD")?;
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() < 2 {
        return None;
    }
    parts[1].parse().ok()
}

fn parse_info_annotation(info: &str) -> InfoAnnotation {
    InfoAnnotation {
        consequence: info_value(info, "Consequence").map(str::to_string),
        impact: info_value(info, "IMPACT").map(str::to_string),
        dbsnp_id: info_value(info, "DB").map(str::to_string),
        in_dbsnp: info_has_flag(info, "DB"),
        cosmic_id: info_value(info, "COSMIC").map(str::to_string),
    }
}

/// Open a VCF, decompressing `.gz` transparently
pub fn open_vcf(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| PipelineError::protocol_io(path, e))?;
    let is_gzip = path.extension().map(|e| e == "gz").unwrap_or(false);
    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Parse a whole variant-call stream. Any malformed line aborts the batch.
pub fn read_vcf<R: BufRead>(reader: R, job_id: &JobId) -> Result<VcfBatch> {
    let mut batch = VcfBatch::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| PipelineError::parse(line_no, format!("read failed: {}", e)))?;
        // `lines` keeps a CR that is not followed by LF
        let line = line.trim_end_matches('\r');
        // Skip header lines
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }

        let record = parse_vcf_line(line, job_id, line_no)?;
        batch.total += 1;
        if record.is_pass() {
            batch.passed += 1;
        }
        batch.records.push(record);
    }

    log::debug!(
        "Parsed {} variants ({} PASS) for job {}",
        batch.total,
        batch.passed,
        job_id
    );
    Ok(batch)
}

/// Parse a VCF file on disk
pub fn parse_vcf(path: &Path, job_id: &JobId) -> Result<VcfBatch> {
    let reader = open_vcf(path)?;
    read_vcf(reader, job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    fn job() -> JobId {
        JobId::new("1")
    }

    #[test]
    fn test_parse_egfr_line() {
        let line = "chr7\t55259515\t.\tT\tG\t.\tPASS\tAF=0.35;DP=500;AD=325,175;Gene=EGFR";
        let v = parse_vcf_line(line, &job(), 1).unwrap();

        assert_eq!(v.chrom, "chr7");
        assert_eq!(v.pos, 55259515);
        assert_eq!(v.kind, VariantKind::Snv);
        assert_eq!(v.allele_freq, Some(0.35));
        assert_eq!(v.depth, Some(500));
        assert_eq!(v.alt_reads, Some(175));
        assert_eq!(v.gene_symbol.as_deref(), Some("EGFR"));
        assert_eq!(v.filter, "PASS");
        assert!(v.is_pass());
    }

    #[test]
    fn test_absent_info_keys_stay_unset() {
        let line = "chr1\t100\trs1\tA\tT\t50\tgermline_risk\tSOMATIC";
        let v = parse_vcf_line(line, &job(), 3).unwrap();
        assert_eq!(v.id, 3);
        assert_eq!(v.allele_freq, None);
        assert_eq!(v.depth, None);
        assert_eq!(v.alt_reads, None);
        assert_eq!(v.gene_symbol, None);
        assert_eq!(v.info, InfoAnnotation::default());
        assert!(!v.is_pass());
    }

    #[test]
    fn test_measured_zero_is_kept() {
        let line = "chr1\t100\t.\tA\tT\t.\tPASS\tAF=0;DP=0";
        let v = parse_vcf_line(line, &job(), 1).unwrap();
        assert_eq!(v.allele_freq, Some(0.0));
        assert_eq!(v.depth, Some(0));
    }

    #[rstest]
    #[case("chr1\t100\t.\tA\tT\t.\tPASS")]
    #[case("chr1\t100\t.\tA\tT")]
    #[case("chr1")]
    #[case("")]
    fn test_short_lines_are_parse_errors(#[case] line: &str) {
        let err = parse_vcf_line(line, &job(), 7).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { line: 7, .. }));
    }

    #[rstest]
    #[case("chr1\tabc\t.\tA\tT\t.\tPASS\t.")]
    #[case("chr1\t-5\t.\tA\tT\t.\tPASS\t.")]
    #[case("chr1\t0\t.\tA\tT\t.\tPASS\t.")]
    #[case("chr1\t10\t.\t\tT\t.\tPASS\t.")]
    #[case("chr1\t10\t.\tA\tT\t.\tPASS\tAF=1.5")]
    #[case("chr1\t10\t.\tA\tT\t.\tPASS\tDP=10;AD=2,20")]
    fn test_malformed_fields_are_parse_errors(#[case] line: &str) {
        assert!(matches!(
            parse_vcf_line(line, &job(), 1),
            Err(PipelineError::Parse { .. })
        ));
    }

    #[rstest]
    #[case("A", "G", VariantKind::Snv)]
    #[case("AT", "A", VariantKind::Deletion)]
    #[case("A", "AT", VariantKind::Insertion)]
    #[case("AT", "GC", VariantKind::Complex)]
    #[case("ATG", "GCC", VariantKind::Complex)]
    #[case("ACGT", "A", VariantKind::Deletion)]
    fn test_kind_from_alleles(
        #[case] ref_allele: &str,
        #[case] alt_allele: &str,
        #[case] expected: VariantKind,
    ) {
        assert_eq!(VariantKind::from_alleles(ref_allele, alt_allele), expected);
    }

    #[test]
    fn test_kind_depends_only_on_lengths() {
        // Every base combination for lengths 1..=4 on both sides
        let bases = ['A', 'C', 'G', 'T'];
        for ref_len in 1..=4usize {
            for alt_len in 1..=4usize {
                let expected = if ref_len == 1 && alt_len == 1 {
                    VariantKind::Snv
                } else if ref_len > alt_len {
                    VariantKind::Deletion
                } else if ref_len < alt_len {
                    VariantKind::Insertion
                } else {
                    VariantKind::Complex
                };
                for (i, b) in bases.iter().enumerate() {
                    let r: String = std::iter::repeat(*b).take(ref_len).collect();
                    let a: String = std::iter::repeat(bases[(i + 1) % 4]).take(alt_len).collect();
                    assert_eq!(VariantKind::from_alleles(&r, &a), expected, "{}>{}", r, a);
                }
            }
        }
    }

    #[test]
    fn test_kind_ignores_info_annotation() {
        let line = "chr1\t100\t.\tAT\tA\t.\tPASS\tConsequence=missense_variant";
        let v = parse_vcf_line(line, &job(), 1).unwrap();
        assert_eq!(v.kind, VariantKind::Deletion);
        assert_eq!(v.info.consequence.as_deref(), Some("missense_variant"));
    }

    #[test]
    fn test_annotation_keys() {
        let line = "chr12\t25398284\t.\tC\tT\t.\tPASS\tGene=KRAS;Consequence=missense_variant;IMPACT=MODERATE;DB=rs121913529;COSMIC=COSM516";
        let v = parse_vcf_line(line, &job(), 1).unwrap();
        assert_eq!(v.info.impact.as_deref(), Some("MODERATE"));
        assert_eq!(v.info.dbsnp_id.as_deref(), Some("rs121913529"));
        assert!(v.info.in_dbsnp);
        assert_eq!(v.info.cosmic_id.as_deref(), Some("COSM516"));

        let flagged = "chr1\t10\t.\tA\tT\t.\tPASS\tDB;DP=20";
        let v = parse_vcf_line(flagged, &job(), 1).unwrap();
        assert!(v.info.in_dbsnp);
        assert_eq!(v.info.dbsnp_id, None);
        assert_eq!(v.depth, Some(20));
    }

    #[test]
    fn test_prefixed_keys_do_not_match() {
        let line = "chr1\t10\t.\tA\tT\t.\tPASS\tMAX_AF=0.9;POP_DP=40";
        let v = parse_vcf_line(line, &job(), 1).unwrap();
        assert_eq!(v.allele_freq, None);
        assert_eq!(v.depth, None);
    }

    #[test]
    fn test_read_vcf_counts() {
        let content = "##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr7\t55259515\t.\tT\tG\t.\tPASS\tAF=0.35;DP=500\n\
chr17\t7577120\t.\tC\tT\t.\tPASS\tGene=TP53\n\
chr3\t178936091\t.\tG\tGA\t.\tgermline_risk\t.\n\
\n";
        let batch = read_vcf(content.as_bytes(), &job()).unwrap();
        assert_eq!(batch.total, 3);
        assert_eq!(batch.passed, 2);
        assert_eq!(batch.records[0].id, 3);
        assert_eq!(batch.records[2].kind, VariantKind::Insertion);
    }

    #[test]
    fn test_read_vcf_crlf_lines() {
        // the last line has a CR but no LF
        let content = "##fileformat=VCFv4.2\r\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\r\n\
chr7\t55259515\t.\tT\tG\t.\tPASS\tAF=0.35;Gene=EGFR\r\n\
\r\n\
chr17\t7577120\t.\tC\tT\t.\tPASS\tGene=TP53\r";
        let batch = read_vcf(content.as_bytes(), &job()).unwrap();
        assert_eq!(batch.total, 2);
        assert_eq!(batch.passed, 2);
        assert_eq!(batch.records[0].gene_symbol.as_deref(), Some("EGFR"));
        assert_eq!(batch.records[1].gene_symbol.as_deref(), Some("TP53"));
    }

    #[test]
    fn test_read_vcf_is_all_or_nothing() {
        let content = "chr1\t10\t.\tA\tT\t.\tPASS\t.\nchr1\tX\t.\tA\tT\t.\tPASS\t.\n";
        let err = read_vcf(content.as_bytes(), &job()).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_parse_gzipped_vcf() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("somatic_variants.vcf.gz");
        let file = File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        writeln!(encoder, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO").unwrap();
        writeln!(encoder, "chr1\t100\t.\tA\tG\t.\tPASS\tDP=10").unwrap();
        encoder.finish().unwrap();

        let batch = parse_vcf(&path, &job()).unwrap();
        assert_eq!(batch.total, 1);
        assert_eq!(batch.records[0].depth, Some(10));
    }

    #[test]
    fn test_missing_file_is_protocol_io() {
        let err = parse_vcf(Path::new("/nonexistent/variants.vcf"), &job()).unwrap_err();
        assert!(matches!(err, PipelineError::ProtocolIo { .. }));
    }
}
