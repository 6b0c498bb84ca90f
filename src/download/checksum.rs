use anyhow::{Context, Result, bail};
use digest::Digest;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl FromStr for ChecksumType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => bail!("Unsupported checksum type: {}", other),
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha1 => write!(f, "sha1"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Lower-case hex digest of the whole file.
    pub async fn calculate_checksum(
        file_path: &Path,
        checksum_type: ChecksumType,
    ) -> Result<String> {
        let file = File::open(file_path)
            .await
            .with_context(|| format!("Failed to open file: {:?}", file_path))?;
        let mut reader = BufReader::new(file);

        match checksum_type {
            ChecksumType::Sha1 => hash_reader::<sha1::Sha1>(&mut reader).await,
            ChecksumType::Sha256 => hash_reader::<sha2::Sha256>(&mut reader).await,
            ChecksumType::Sha512 => hash_reader::<sha2::Sha512>(&mut reader).await,
            ChecksumType::Md5 => {
                let mut context = md5::Context::new();
                let mut buffer = vec![0; READ_BUFFER_SIZE];
                loop {
                    let n = reader.read(&mut buffer).await?;
                    if n == 0 {
                        break;
                    }
                    context.consume(&buffer[..n]);
                }
                Ok(format!("{:x}", context.finalize()))
            }
        }
    }
}

async fn hash_reader<D: Digest>(reader: &mut BufReader<File>) -> Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0; READ_BUFFER_SIZE];
    loop {
        let n = reader
            .read(&mut buffer)
            .await
            .context("Failed to read file while hashing")?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_known_digests() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, "Hello, World!").await?;

        let sha256 = ChecksumVerifier::calculate_checksum(&path, ChecksumType::Sha256).await?;
        assert_eq!(
            sha256,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );

        let md5 = ChecksumVerifier::calculate_checksum(&path, ChecksumType::Md5).await?;
        assert_eq!(md5, "65a8e27d8879283831b664bd8b7f0ad4");

        let sha1 = ChecksumVerifier::calculate_checksum(&path, ChecksumType::Sha1).await?;
        assert_eq!(sha1, "0a0a9f2a6772942557ab5355d76af442f8f65e01");
        Ok(())
    }

    #[test]
    fn test_parse_checksum_type() {
        assert_eq!("SHA-256".parse::<ChecksumType>().unwrap(), ChecksumType::Sha256);
        assert_eq!("md5".parse::<ChecksumType>().unwrap(), ChecksumType::Md5);
        assert!("crc32".parse::<ChecksumType>().is_err());
    }
}
