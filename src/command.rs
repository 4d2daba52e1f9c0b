//! OS command construction: shell discovery, command-line splitting,
//! binary lookup, credential resolution and the spawn attributes applied
//! to every child (process group, parent-death signal, uid/gid drop,
//! inherited descriptors).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::Error;
use crate::options::ProcessOptions;

#[cfg(unix)]
use std::os::unix::io::RawFd;

/// Shell used by `create_from_cmdline`: `cmd.exe` on Windows, the first of
/// `/bin/bash` / `/bin/sh` elsewhere, falling back to a PATH search.
pub(crate) fn shell_path() -> String {
    #[cfg(windows)]
    {
        search_binary("cmd.exe")
    }
    #[cfg(not(windows))]
    {
        if Path::new("/bin/bash").exists() {
            return "/bin/bash".to_string();
        }
        if Path::new("/bin/sh").exists() {
            return "/bin/sh".to_string();
        }
        let path = search_binary("bash");
        if !path.is_empty() {
            return path;
        }
        search_binary("sh")
    }
}

/// The shell's "run this command string" flag.
pub(crate) fn shell_flag() -> &'static str {
    if cfg!(windows) {
        "/c"
    } else {
        "-c"
    }
}

/// Split a command line the way `cmd.exe` consumers expect: spaces
/// separate tokens, `"…"` and `'…'` preserve embedded spaces, and `\`
/// escapes the closing quote character. Unix hosts pass the whole string
/// to the shell instead and never call this.
pub(crate) fn split_cmdline(cmd: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut arg = String::new();
    let mut quote = '\0';

    for v in cmd.split_whitespace() {
        if !arg.is_empty() {
            arg.push(' ');
        }
        let bytes = v.as_bytes();
        let first = bytes[0] as char;
        let last1 = bytes[bytes.len() - 1] as char;
        let last2 = if bytes.len() > 1 {
            bytes[bytes.len() - 2] as char
        } else {
            '\0'
        };

        if quote == '\0' && (first == '"' || first == '\'') {
            // Opening quote: drop it and start accumulating.
            arg.push_str(&v[1..]);
            quote = first;
        } else if quote != '\0' && last2 != '\\' && last1 == quote {
            // Unescaped closing quote: drop it and emit the token.
            arg.push_str(&v[..v.len() - 1]);
            args.push(std::mem::take(&mut arg));
            quote = '\0';
        } else if !arg.is_empty() {
            arg.push_str(v);
        } else {
            args.push(v.to_string());
            arg.clear();
        }
    }
    args
}

/// Search `file` in the working directory, then PATH. Returns an empty
/// string when nothing matches.
pub(crate) fn search_binary(file: &str) -> String {
    if Path::new(file).exists() {
        return file.to_string();
    }
    search_binary_path(file)
}

fn search_binary_path(file: &str) -> String {
    let path_var = std::env::var("PATH").unwrap_or_default();
    #[cfg(windows)]
    let file = if Path::new(file).extension().is_none() {
        format!("{file}.exe")
    } else {
        file.to_string()
    };
    #[cfg(windows)]
    let file = file.as_str();

    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(file);
        if candidate.is_file() {
            return candidate.to_string_lossy().into_owned();
        }
    }
    String::new()
}

/// Path of the executable the launch spec names, for the binary-change
/// monitor. Empty when it cannot be resolved.
pub(crate) fn executable_path(options: &ProcessOptions) -> PathBuf {
    PathBuf::from(search_binary(&options.command))
}

/// Uid/gid pair resolved from a `user[:group]` spec.
#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct Credential {
    pub uid: u32,
    pub gid: u32,
}

/// Resolve `user` or `user:group` to a [`Credential`]. The group part,
/// when present, overrides the user's primary group. No supplementary
/// groups are installed.
#[cfg(unix)]
pub(crate) fn resolve_user(spec: &str) -> Result<Credential, Error> {
    let (user_name, group_name) = match spec.split_once(':') {
        Some((u, g)) => (u, Some(g)),
        None => (spec, None),
    };

    let user = users::get_user_by_name(user_name).ok_or_else(|| Error::UnknownUser {
        spec: spec.to_string(),
    })?;
    let mut gid = user.primary_group_id();

    if let Some(group_name) = group_name {
        let group = users::get_group_by_name(group_name).ok_or_else(|| Error::UnknownUser {
            spec: spec.to_string(),
        })?;
        gid = group.gid();
    }

    Ok(Credential {
        uid: user.uid(),
        gid,
    })
}

/// Build the OS command for one spawn attempt: argv, cwd, environment
/// merge (host snapshot + per-process overrides), piped stdio and the
/// platform spawn attributes.
///
/// Configuration problems (empty command, unknown user) surface here so
/// the supervision loop can classify them as persistent.
pub(crate) fn build_command(options: &ProcessOptions) -> Result<Command, Error> {
    let program = options.command.trim();
    if program.is_empty() {
        return Err(Error::EmptyCommand {
            name: options.name.clone(),
        });
    }

    let mut cmd = Command::new(program);
    cmd.args(&options.args);
    if let Some(dir) = &options.directory {
        cmd.current_dir(dir);
    }
    // The child inherits the host snapshot; overrides are layered on top
    // and never written back into the host environment.
    cmd.envs(&options.environment);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(false);

    #[cfg(unix)]
    apply_unix_attrs(&mut cmd, options)?;

    Ok(cmd)
}

#[cfg(unix)]
fn apply_unix_attrs(cmd: &mut Command, options: &ProcessOptions) -> Result<(), Error> {
    use nix::unistd::{setgid, setpgid, setuid, Gid, Pid, Uid};

    let credential = options.user.as_deref().map(resolve_user).transpose()?;
    let extra_files: Vec<RawFd> = options.extra_files.clone();

    unsafe {
        cmd.pre_exec(move || {
            // Own process group, so group-addressed signals reach every
            // descendant.
            setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(std::io::Error::from)?;

            #[cfg(target_os = "linux")]
            {
                // Orphaned children must not outlive the host.
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0)
                    != 0
                {
                    return Err(std::io::Error::last_os_error());
                }
            }

            // Inherited descriptors appear as fd 3, 4, ... in the child;
            // dup2 clears close-on-exec on the duplicate.
            for (i, fd) in extra_files.iter().enumerate() {
                let target = 3 + i as RawFd;
                if *fd != target && libc::dup2(*fd, target) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }

            // Group first, then user: after setuid we may no longer be
            // allowed to change the gid.
            if let Some(cred) = credential {
                setgid(Gid::from_raw(cred.gid)).map_err(std::io::Error::from)?;
                setuid(Uid::from_raw(cred.uid)).map_err(std::io::Error::from)?;
            }
            Ok(())
        });
    }
    Ok(())
}
