//! Fixed Provider Registry (§6). `provider_tag` on an `EmailAccount` selects
//! one of these entries; the fetcher never needs to learn a new provider
//! without a code change, matching the source's static table.

#[derive(Clone, Copy, Debug)]
pub struct ProviderEntry {
    pub imap_host: &'static str,
    pub imap_port: u16,
    pub smtp_host: &'static str,
    pub smtp_port: u16,
    pub use_tls: bool,
}

/// Looks up the fixed registry entry for a `provider_tag`. `sina` tags are
/// resolved by the caller from the address's domain suffix before this is
/// called (see `resolve_sina`).
pub fn lookup(tag: &str) -> Option<ProviderEntry> {
    match tag {
        "gmail" => Some(ProviderEntry {
            imap_host: "imap.gmail.com",
            imap_port: 993,
            smtp_host: "smtp.gmail.com",
            smtp_port: 587,
            use_tls: true,
        }),
        "126" => Some(ProviderEntry {
            imap_host: "imap.126.com",
            imap_port: 993,
            smtp_host: "smtp.126.com",
            smtp_port: 465,
            use_tls: true,
        }),
        "163" => Some(ProviderEntry {
            imap_host: "imap.163.com",
            imap_port: 993,
            smtp_host: "smtp.163.com",
            smtp_port: 465,
            use_tls: true,
        }),
        "qq" => Some(ProviderEntry {
            imap_host: "imap.qq.com",
            imap_port: 993,
            smtp_host: "smtp.qq.com",
            smtp_port: 587,
            use_tls: true,
        }),
        "outlook" | "hotmail" => Some(ProviderEntry {
            imap_host: "imap-mail.outlook.com",
            imap_port: 993,
            smtp_host: "smtp-mail.outlook.com",
            smtp_port: 587,
            use_tls: true,
        }),
        "yahoo" => Some(ProviderEntry {
            imap_host: "imap.mail.yahoo.com",
            imap_port: 993,
            smtp_host: "smtp.mail.yahoo.com",
            smtp_port: 587,
            use_tls: true,
        }),
        _ => None,
    }
}

const SINA_DOMAINS: [&str; 4] = ["sina.com", "sina.cn", "vip.sina.com", "vip.sina.cn"];

/// `sina` is resolved post-hoc from the address's full domain (§6).
pub fn resolve_sina(address: &str) -> Option<ProviderEntry> {
    let domain = address.rsplit('@').next()?;
    if !SINA_DOMAINS.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
        return None;
    }
    // `imap.<domain>:993 TLS` / `smtp.<domain>:465 TLS`. Leaked as 'static by
    // design: the registry is a fixed, small set of domains known at compile
    // time, so this runs at most a handful of times per account add.
    let imap_host: &'static str = Box::leak(format!("imap.{domain}").into_boxed_str());
    let smtp_host: &'static str = Box::leak(format!("smtp.{domain}").into_boxed_str());
    Some(ProviderEntry {
        imap_host,
        imap_port: 993,
        smtp_host,
        smtp_port: 465,
        use_tls: true,
    })
}

/// Resolves a `provider_tag` plus address into a concrete registry entry,
/// handling the `sina` special case.
pub fn resolve(tag: &str, address: &str) -> Option<ProviderEntry> {
    if tag == "sina" {
        return resolve_sina(address);
    }
    lookup(tag)
}

/// Auto-detects a provider tag from an address's domain, for account
/// creation (§6 "Address-to-tag auto-detection").
pub fn detect_tag(address: &str) -> Option<&'static str> {
    let domain = address.rsplit('@').next()?.to_ascii_lowercase();
    match domain.as_str() {
        "gmail.com" => Some("gmail"),
        "126.com" => Some("126"),
        "163.com" => Some("163"),
        "qq.com" => Some("qq"),
        "outlook.com" => Some("outlook"),
        "hotmail.com" => Some("hotmail"),
        "yahoo.com" => Some("yahoo"),
        d if SINA_DOMAINS.iter().any(|s| *s == d) => Some("sina"),
        _ => None,
    }
}
