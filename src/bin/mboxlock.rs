use anyhow::Result;

fn main() -> Result<()> {
    mboxlock::cli::run()
}
