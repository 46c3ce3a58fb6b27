use anyhow::Result;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    basis_lab::earnings::run_earnings_cli(&args)
}
