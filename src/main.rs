fn main() -> anyhow::Result<()> {
    aoitrack_lib::run()
}
