pub mod file;
pub mod range;

/// Names the cache file of a resource.
pub trait FileNameGenerator: Send + Sync + 'static {
    fn generate(&self, url: &str) -> String;
}

/// Hex MD5 of the url, keeping a short extension so players can still sniff the type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5FileNameGenerator;

const MAX_EXTENSION_LENGTH: usize = 4;

impl FileNameGenerator for Md5FileNameGenerator {
    fn generate(&self, url: &str) -> String {
        let digest = format!("{:x}", md5::compute(url.as_bytes()));
        match extension(url) {
            Some(ext) => format!("{digest}.{ext}"),
            None => digest,
        }
    }
}

fn extension(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(url) => url.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let file_name = path.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LENGTH
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_string())
}
