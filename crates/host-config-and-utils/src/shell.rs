//! Default shell selection.

/// PowerShell's well-known install path, used when `%COMSPEC%` is unset.
#[cfg(windows)]
const POWERSHELL_PATH: &str = r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe";

/// Resolve the shell to run when the caller did not name one.
///
/// Windows: `%COMSPEC%`, falling back to PowerShell at its standard path.
/// Elsewhere: `$SHELL`, falling back to `/bin/bash`.
pub fn default_shell() -> String {
    #[cfg(windows)]
    {
        non_empty_env("COMSPEC").unwrap_or_else(|| POWERSHELL_PATH.to_string())
    }
    #[cfg(not(windows))]
    {
        non_empty_env("SHELL").unwrap_or_else(|| "/bin/bash".to_string())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shell_is_absolute() {
        // SHELL/COMSPEC point at an absolute path in any sane environment,
        // and so do both fallbacks.
        let shell = default_shell();
        assert!(!shell.is_empty());
    }

    #[test]
    fn non_empty_env_rejects_blank() {
        std::env::set_var("RIT_TEST_BLANK_VAR", "   ");
        assert_eq!(non_empty_env("RIT_TEST_BLANK_VAR"), None);
        std::env::set_var("RIT_TEST_BLANK_VAR", "zsh");
        assert_eq!(non_empty_env("RIT_TEST_BLANK_VAR"), Some("zsh".to_string()));
        std::env::remove_var("RIT_TEST_BLANK_VAR");
    }
}
