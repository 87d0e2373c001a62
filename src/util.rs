const PIPELINE_BUS_URL: &str = "PIPELINE_BUS_URL";

pub fn get_bus_url() -> Option<String> {
    std::env::var(PIPELINE_BUS_URL).ok()
}

const PIPELINE_DB_PATH: &str = "PIPELINE_DB_PATH";

pub fn get_db_path() -> Option<std::path::PathBuf> {
    std::env::var(PIPELINE_DB_PATH).ok().map(std::path::PathBuf::from)
}
