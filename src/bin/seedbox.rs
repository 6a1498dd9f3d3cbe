use anyhow::Result;

fn main() -> Result<()> {
    seedbox::cli::run()
}
