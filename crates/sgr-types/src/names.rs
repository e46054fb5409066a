/// Make a database or collection name safe for the document store.
///
/// Spaces, `$` and `.` become `_`, and a `system.` prefix is dropped.
pub fn sanitize_name(name: &str) -> String {
    let name = name.strip_prefix("system.").unwrap_or(name);
    name.chars()
        .map(|c| match c {
            ' ' | '$' | '.' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_reserved_characters() {
        assert_eq!(sanitize_name("my project.v2"), "my_project_v2");
        assert_eq!(sanitize_name("a$b"), "a_b");
    }

    #[test]
    fn strips_system_prefix() {
        assert_eq!(sanitize_name("system.users"), "users");
    }

    #[test]
    fn leaves_clean_names_alone() {
        assert_eq!(sanitize_name("house_model"), "house_model");
    }
}
