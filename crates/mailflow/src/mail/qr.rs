pub const DEFAULT_QR_BASE_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";

/// URL-based QR image generator. Stateless: the image URL is a pure function of the data.
#[derive(Debug, Clone)]
pub struct QrCodeService {
    base_url: String,
    size: u32,
}

impl Default for QrCodeService {
    fn default() -> Self {
        Self::new(DEFAULT_QR_BASE_URL)
    }
}

impl QrCodeService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            size: 200,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn image_url(&self, data: &str) -> String {
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}size={}x{}&data={}",
            self.base_url,
            sep,
            self.size,
            self.size,
            urlencoding::encode(data)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_embeds_encoded_data() {
        let qr = QrCodeService::default();
        assert_eq!(
            qr.image_url("res-42"),
            "https://api.qrserver.com/v1/create-qr-code/?size=200x200&data=res-42"
        );
        assert!(qr.image_url("a b&c").ends_with("data=a%20b%26c"));
    }

    #[test]
    fn base_url_with_query_gets_ampersand() {
        let qr = QrCodeService::new("https://qr.local/gen?fmt=png");
        assert_eq!(
            qr.image_url("x"),
            "https://qr.local/gen?fmt=png&size=200x200&data=x"
        );
    }
}
