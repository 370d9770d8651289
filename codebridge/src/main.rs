fn main() -> anyhow::Result<()> {
    codebridge_core::observability::init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(codebridge::run_cli())
}
