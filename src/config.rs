/// Runtime configuration pulled from the environment (via dotenv).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub max_connection_pooling: u32,
    pub port: u16,
    pub log_file: String,

    pub shared_btc_address: Option<String>,
    pub shared_ltc_address: Option<String>,
    pub blockcypher_token: Option<String>,

    pub price_api_url: String,
    pub btc_explorer_url: String,
    pub ltc_explorer_url: String,
    pub blockcypher_url: String,

    pub deposit_scan_secs: u64,
    pub expiry_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            // mandatory fields
            database_url: dotenv::var("DATABASE_URL").unwrap(),
            // optional fields
            jwt_secret: dotenv::var("JWT_SECRET").unwrap_or("your-jwt-secret".to_string()),
            max_connection_pooling: dotenv::var("MAX_CONNECTION_POOLING")
                .unwrap_or("5".to_string())
                .parse::<u32>()
                .unwrap(),
            port: dotenv::var("PORT")
                .unwrap_or("3000".to_string())
                .parse::<u16>()
                .unwrap(),
            log_file: dotenv::var("LOG_FILE").unwrap_or("app.log".to_string()),
            shared_btc_address: dotenv::var("SHARED_BTC_ADDRESS").ok().filter(|v| !v.is_empty()),
            shared_ltc_address: dotenv::var("SHARED_LTC_ADDRESS").ok().filter(|v| !v.is_empty()),
            blockcypher_token: dotenv::var("BLOCKCYPHER_TOKEN").ok().filter(|v| !v.is_empty()),
            price_api_url: dotenv::var("PRICE_API_URL")
                .unwrap_or("https://api.coingecko.com/api/v3".to_string()),
            btc_explorer_url: dotenv::var("BTC_EXPLORER_URL")
                .unwrap_or("https://mempool.space/api".to_string()),
            ltc_explorer_url: dotenv::var("LTC_EXPLORER_URL")
                .unwrap_or("https://litecoinspace.org/api".to_string()),
            blockcypher_url: dotenv::var("BLOCKCYPHER_URL")
                .unwrap_or("https://api.blockcypher.com/v1".to_string()),
            deposit_scan_secs: dotenv::var("DEPOSIT_SCAN_SECS")
                .unwrap_or("60".to_string())
                .parse::<u64>()
                .unwrap(),
            expiry_sweep_secs: dotenv::var("EXPIRY_SWEEP_SECS")
                .unwrap_or("300".to_string())
                .parse::<u64>()
                .unwrap(),
        }
    }
}
