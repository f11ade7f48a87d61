//! Print the targets a run would dispatch.

use anyhow::Result;
use std::path::Path;

use netassert_types::TargetClass;

/// Run the list command.
pub async fn run(config: &Path) -> Result<()> {
    let document = super::load_document(config).await?;

    for class in TargetClass::ALL {
        for target in document.targets(class) {
            let kind = if target.is_local() { "local" } else { class.as_str() };
            println!("{:<6} {}", kind, target.id());
        }
    }
    println!(
        "{} tests expected ({} assertions)",
        document.expected_test_count(),
        document.assertion_count()
    );

    Ok(())
}
