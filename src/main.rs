use servebench::error::AppResult;

fn main() -> AppResult<()> {
    servebench::entry::run()
}
