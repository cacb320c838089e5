use super::cedar::parse_listing;

const SQUEUE_OUTPUT: &str = "\
             JOBID PARTITION     NAME     USER ST       TIME  NODES NODELIST(REASON)
          54410021  cpubase_b slurm_wC    alice  R    1:02:03      1 cdr768
          54410022  cpubase_b slurm_wC    alice PD       0:00      1 (Priority)
          54410099  cpubase_b other_jo      bob  R      10:00      1 cdr100
";

#[test]
pub fn listing_filters_to_the_owning_user() {
    let listing = parse_listing(SQUEUE_OUTPUT, "alice");

    assert_eq!(listing.records.len(), 2);
    assert_eq!(listing.records[0].job_id, "54410021");
    assert_eq!(listing.records[1].job_id, "54410022");
}

#[test]
pub fn header_is_detected_by_the_jobid_sentinel() {
    let listing = parse_listing(SQUEUE_OUTPUT, "alice");

    assert!(listing
        .header
        .as_deref()
        .unwrap()
        .trim_start()
        .starts_with("JOBID"));

    let lines = listing.status_lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("PARTITION"));
}

#[test]
pub fn empty_or_malformed_output_yields_no_records() {
    assert!(parse_listing("", "alice").records.is_empty());
    assert!(parse_listing("short line\n\n", "alice").records.is_empty());
}

#[test]
pub fn no_rows_means_no_status_lines() {
    // header alone is not repeated when nothing matched
    let listing = parse_listing(SQUEUE_OUTPUT, "mallory");

    assert!(listing.header.is_some());
    assert!(listing.status_lines().is_empty());
}
