use std::path::{Path, PathBuf};

use tracing::debug;

pub const PROFILE_EXT: &str = "conf";

/// Finds exported client profiles (`NAME.conf`) across an ordered list of
/// directories. First match wins.
#[derive(Debug, Clone)]
pub struct ProfileLocator {
    search_paths: Vec<PathBuf>,
}

impl ProfileLocator {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        let mut deduped: Vec<PathBuf> = Vec::with_capacity(search_paths.len());
        for p in search_paths {
            if !deduped.contains(&p) {
                deduped.push(p);
            }
        }
        Self {
            search_paths: deduped,
        }
    }

    /// Export directory of the installer script followed by the usual places
    /// it ends up in, then `extra`, then the temp dir.
    pub fn standard(extra: &[PathBuf]) -> Self {
        let mut paths = vec![export_directory()];
        paths.push(PathBuf::from("/root"));
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home));
        }
        paths.push(PathBuf::from("/etc/wireguard/clients"));
        paths.extend(extra.iter().cloned());
        paths.push(std::env::temp_dir());
        Self::new(paths)
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn file_name(name: &str) -> String {
        format!("{name}.{PROFILE_EXT}")
    }

    pub fn find(&self, name: &str) -> Option<PathBuf> {
        let file_name = Self::file_name(name);
        let found = self
            .search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|p| p.is_file());

        match &found {
            Some(p) => debug!("found profile {}", p.display()),
            None => debug!("profile {file_name} not found in any search path"),
        }
        found
    }
}

/// Home of the user that escalated through sudo, else the current home.
///
/// Mirrors where the installer script writes exported profiles.
pub fn export_directory() -> PathBuf {
    let fallback = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"));

    let Some(sudo_user) = std::env::var("SUDO_USER").ok().filter(|u| !u.is_empty()) else {
        return fallback;
    };

    let passwd = std::fs::read_to_string("/etc/passwd").unwrap_or_default();
    match home_from_passwd(&passwd, &sudo_user) {
        Some(home) if home.as_path() != Path::new("/") && home.is_dir() => home,
        _ => fallback,
    }
}

fn home_from_passwd(passwd: &str, user: &str) -> Option<PathBuf> {
    passwd
        .lines()
        .map(|l| l.split(':').collect::<Vec<_>>())
        .find(|f| f.len() >= 7 && f[0] == user)
        .map(|f| PathBuf::from(f[5]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(b.path().join("alice.conf"), "b").unwrap();
        std::fs::write(a.path().join("alice.conf"), "a").unwrap();
        std::fs::write(b.path().join("bob.conf"), "b").unwrap();

        let locator = ProfileLocator::new(vec![a.path().into(), b.path().into()]);
        assert_eq!(locator.find("alice"), Some(a.path().join("alice.conf")));
        assert_eq!(locator.find("bob"), Some(b.path().join("bob.conf")));
        assert_eq!(locator.find("carol"), None);
    }

    #[test]
    fn directories_are_not_profiles() {
        let a = tempfile::tempdir().unwrap();
        std::fs::create_dir(a.path().join("dave.conf")).unwrap();
        let locator = ProfileLocator::new(vec![a.path().into()]);
        assert_eq!(locator.find("dave"), None);
    }

    #[test]
    fn duplicate_search_paths_collapse() {
        let locator = ProfileLocator::new(vec!["/tmp".into(), "/root".into(), "/tmp".into()]);
        assert_eq!(
            locator.search_paths(),
            [PathBuf::from("/tmp"), PathBuf::from("/root")]
        );
    }

    #[test]
    fn passwd_lookup() {
        let passwd = "root:x:0:0:root:/root:/bin/bash
shair:x:1000:1000:,,,:/home/shair:/bin/bash
";
        assert_eq!(
            home_from_passwd(passwd, "shair"),
            Some(PathBuf::from("/home/shair"))
        );
        assert_eq!(home_from_passwd(passwd, "nobody"), None);
    }
}
