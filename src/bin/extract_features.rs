use casefeat::{
    extraction_config_from_env, extraction_paths_from_env, init_logging, log_app_start,
    log_inputs_selected, logging_config_from_env, run_extraction_from_paths,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let paths = extraction_paths_from_env();
    let config = extraction_config_from_env();
    log_inputs_selected(&paths, &config);

    let report = run_extraction_from_paths(&paths, &config)?;

    println!(
        "Extraction complete | committed={} skipped={} planned={} rows_per_file={} dir={}",
        report.committed_case_days,
        report.skipped_case_days.len(),
        report.planned_case_days,
        report.rows_per_file,
        paths.feature_dir.display()
    );
    if let Some(first_error) = &report.first_error {
        println!("First skipped case-day error: {first_error}");
    }

    Ok(())
}
